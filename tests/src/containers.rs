//! Testcontainer setup for Redis.

use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage,
};

/// Running Redis, or an external one named by `SESSION_MESH_TEST_REDIS_URL`.
pub struct TestRedis {
    #[allow(dead_code)]
    container: Option<ContainerAsync<GenericImage>>,
    pub url: String,
}

impl TestRedis {
    /// Start a Redis container.
    pub async fn start() -> Self {
        if let Some(url) = std::env::var("SESSION_MESH_TEST_REDIS_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
        {
            return Self {
                container: None,
                url,
            };
        }

        let image = GenericImage::new("redis", "7-alpine")
            .with_exposed_port(6379.tcp())
            .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));

        let container = image.start().await.expect("Failed to start Redis");
        let port = container
            .get_host_port_ipv4(6379)
            .await
            .expect("Redis port not mapped");

        Self {
            container: Some(container),
            url: format!("redis://127.0.0.1:{}", port),
        }
    }
}

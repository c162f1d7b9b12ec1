use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use tracing::info;

const REVOKED_PREFIX: &str = "revoked_token:";

#[derive(Clone)]
pub struct RedisService {
    client: Client,
}

impl RedisService {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = Client::open(connection_string)?;

        // Fail start-up early if the server is unreachable.
        let _conn = client.get_multiplexed_async_connection().await?;

        info!("Connected to Redis");
        Ok(Self { client })
    }

    pub async fn get_conn(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    /// Blocks an access token until it would have expired anyway.
    pub async fn revoke_token(&self, token: &str, ttl_seconds: u64) -> Result<(), redis::RedisError> {
        let mut conn = self.get_conn().await?;
        conn.set_ex::<_, _, ()>(revoked_key(token), 1, ttl_seconds.max(1)).await
    }

    pub async fn is_revoked(&self, token: &str) -> Result<bool, redis::RedisError> {
        let mut conn = self.get_conn().await?;
        conn.exists(revoked_key(token)).await
    }
}

fn revoked_key(token: &str) -> String {
    format!("{REVOKED_PREFIX}{token}")
}

// Redis connection setup

use crate::error::map_redis_error;
use redis::aio::MultiplexedConnection;
use redis::Client;
use tally_core::Result;
use tracing::{debug, info};

/// Open a multiplexed connection and check it answers PING
///
/// The connection is cheap to clone; clones share one socket.
pub async fn connect(url: &str) -> Result<MultiplexedConnection> {
    debug!(url = %sanitize_url(url), "Connecting to Redis");

    let client = Client::open(url).map_err(map_redis_error)?;
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .map_err(map_redis_error)?;

    let _: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .map_err(map_redis_error)?;

    info!(url = %sanitize_url(url), "Redis connection established");
    Ok(conn)
}

/// Hide the password part of a redis URL for logging
pub(crate) fn sanitize_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            let credentials = &url[scheme_end + 3..at];
            match credentials.find(':') {
                Some(colon) => format!(
                    "{}{}:***{}",
                    &url[..scheme_end + 3],
                    &credentials[..colon],
                    &url[at..]
                ),
                None => url.to_string(),
            }
        }
        _ => url.to_string(),
    }
}

// redis::RedisError -> AppError::Store

use tally_core::AppError;

pub(crate) fn map_redis_error(err: redis::RedisError) -> AppError {
    match err.kind() {
        redis::ErrorKind::TypeError => {
            AppError::Store(format!("Unexpected value type: {}", err))
        }
        redis::ErrorKind::ResponseError if err.code() == Some("WRONGTYPE") => {
            AppError::Store(format!("Key holds the wrong kind of value: {}", err))
        }
        _ if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() => {
            AppError::Store(format!("Redis unavailable: {}", err))
        }
        _ => AppError::Store(format!("Redis error: {}", err)),
    }
}

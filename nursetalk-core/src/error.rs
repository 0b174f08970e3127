use thiserror::Error;

#[derive(Error, Debug)]
pub enum NurseTalkError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generation error: {0}")]
    Generation(#[from] crate::generation::GenerationError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] crate::messaging::DeliveryError),

    #[error("Other error: {0}")]
    Other(String),
}

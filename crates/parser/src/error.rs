use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFile(String),

    #[error("File is empty: {0}")]
    EmptyFile(String),

    #[error("File contains binary content: {0}")]
    BinaryContent(String),
}

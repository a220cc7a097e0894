use thiserror::Error;

/// Errors produced by the container codec and the authoring operations.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("file does not carry a bundle signature")]
    BadSignature,
    #[error("section {index} has a malformed name")]
    BadName { index: usize },
    #[error("archive claims payloads up to offset {expected} but the file ends at {actual}")]
    Truncated { expected: u64, actual: u64 },
    #[error("attempt to use a closed file")]
    Closed,
    #[error("section {index} is not backed by writable storage")]
    NotWritable { index: usize },
    #[error("unknown data type tag {0}")]
    BadDataType(u8),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Scroll(#[from] scroll::Error),
}

/// Errors from locating the end of the host executable image.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("unsupported executable image format")]
    UnsupportedImage,
    #[error(transparent)]
    Object(#[from] goblin::error::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors from the in-memory native-module loader.
#[derive(Debug, Error)]
pub enum NativeLoadError {
    #[error("native sections are not supported on this platform")]
    Unsupported,
    #[error("malformed shared-object image: {0}")]
    Object(#[from] goblin::error::Error),
    #[error("unable to map module image: {0}")]
    Map(std::io::Error),
    #[error("dynamic loader rejected `{name}`: {source}")]
    Load {
        name: String,
        source: libloading::Error,
    },
    #[error("module `{name}` has no entry symbol `{symbol}`")]
    SymbolMissing { name: String, symbol: String },
    #[error(transparent)]
    Container(#[from] ContainerError),
}

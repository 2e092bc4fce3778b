// =============================================================================
// Queue Errors
// =============================================================================

/// Errors surfaced by the queue facade.
///
/// Truncation on the read path is not an error: it is reported through
/// [`Decoded::truncated`](crate::Decoded::truncated) alongside the bytes that
/// were delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The ring is full; the message was dropped and counted.
    WouldBlockWrite,
    /// The ring is empty (or a blocking wait ran out of time).
    WouldBlockRead,
    /// The wakeup primitive was destroyed while a blocking pop was pending.
    EndOfStream,
    /// The queue has been destroyed.
    Closed,
    /// Slot size or capacity is unusable.
    InvalidConfig(&'static str),
    /// The backing region does not hold a usable queue.
    Layout(LayoutError),
}

impl QueueError {
    /// Returns true for conditions the caller may retry later.
    #[inline]
    pub fn is_would_block(&self) -> bool {
        matches!(self, Self::WouldBlockWrite | Self::WouldBlockRead)
    }
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WouldBlockWrite => write!(f, "queue is full, message dropped"),
            Self::WouldBlockRead => write!(f, "queue is empty"),
            Self::EndOfStream => write!(f, "end of stream"),
            Self::Closed => write!(f, "queue is closed"),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            Self::Layout(err) => write!(f, "layout error: {}", err),
        }
    }
}

impl std::error::Error for QueueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Layout(err) => Some(err),
            _ => None,
        }
    }
}

impl From<LayoutError> for QueueError {
    fn from(err: LayoutError) -> Self {
        match err {
            LayoutError::InvalidConfig(msg) => Self::InvalidConfig(msg),
            other => Self::Layout(other),
        }
    }
}

// =============================================================================
// Layout Errors
// =============================================================================

/// Errors from initializing or attaching to a ring in a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    /// Invalid magic bytes.
    InvalidMagic,
    /// Incompatible layout version.
    IncompatibleVersion { expected: u32, found: u32 },
    /// Region too small for the header plus storage.
    RegionTooSmall { required: usize, found: usize },
    /// Region start is not cache-line aligned.
    Misaligned,
    /// Invalid configuration in header.
    InvalidConfig(&'static str),
    /// The queue wakes its consumer through a process-local primitive, so
    /// another handle cannot attach to it.
    NotShared,
}

impl std::fmt::Display for LayoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMagic => write!(f, "invalid magic bytes"),
            Self::IncompatibleVersion { expected, found } => {
                write!(
                    f,
                    "incompatible version: expected {}.{}, found {}.{}",
                    expected >> 16,
                    expected & 0xFFFF,
                    found >> 16,
                    found & 0xFFFF
                )
            }
            Self::RegionTooSmall { required, found } => {
                write!(
                    f,
                    "region too small: need {} bytes, got {}",
                    required, found
                )
            }
            Self::Misaligned => write!(f, "region is not 64-byte aligned"),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            Self::NotShared => write!(f, "queue was not created for sharing"),
        }
    }
}

impl std::error::Error for LayoutError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_invalid_config_folds_into_queue_invalid_config() {
        let err: QueueError = LayoutError::InvalidConfig("slot_size must be > 0").into();
        assert_eq!(err, QueueError::InvalidConfig("slot_size must be > 0"));

        let err: QueueError = LayoutError::InvalidMagic.into();
        assert_eq!(err, QueueError::Layout(LayoutError::InvalidMagic));
    }

    #[test]
    fn version_is_rendered_as_major_minor() {
        let err = LayoutError::IncompatibleVersion {
            expected: 1 << 16,
            found: (2 << 16) | 3,
        };
        assert_eq!(err.to_string(), "incompatible version: expected 1.0, found 2.3");
    }
}

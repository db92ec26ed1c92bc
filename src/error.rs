use thiserror::Error;

#[derive(Error, Debug)]
pub enum IvringError {
    #[error("region size {0} is not a multiple of the page size")]
    SizeNotAligned(usize),

    #[error("region size {0} too small, need the control page plus at least one data byte")]
    SizeTooSmall(usize),

    #[error("capacity {capacity} does not fit the mapped data area of {data_len} bytes")]
    CapacityTooLarge { capacity: u32, data_len: usize },

    #[error("capacity {0} is outside the supported range of 2..=2147483647 bytes")]
    CapacityOutOfRange(u32),

    #[error("memory mapping failed: {0}")]
    MmapFailed(#[from] nix::errno::Errno),

    #[error("control block mismatch: expected magic {expected:#010x}, found {found:#010x}")]
    BadLayout { expected: u32, found: u32 },

    #[error("control block version {found} not supported (expected {expected})")]
    BadVersion { expected: u32, found: u32 },

    #[error("eventfd creation failed: {0}")]
    EventfdCreation(String),

    #[error("notification send failed: {0}")]
    NotifyFailed(String),

    #[error("notification wait failed: {0}")]
    WaitFailed(String),

    #[error("interrupt read returned {0} bytes, expected 4")]
    ShortInterruptRead(usize),

    #[error("pattern mismatch at byte {offset}: expected {expected:#04x}, found {found:#04x}")]
    PatternMismatch {
        offset: usize,
        expected: u8,
        found: u8,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

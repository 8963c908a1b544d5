mod settings;

pub use settings::{
    ConnectivitySettings, LoggingSettings, QueueSettings, ReplaySettings, Settings,
    DATA_DIR_ENV, GC_KEEP_LINES_ENV, MAX_BYTES_ENV, QUEUE_FILE_NAME,
};

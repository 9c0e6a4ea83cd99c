macro_rules! debug {
    ($($arg:tt)+) => {
        ::log::debug!(target: "http_stream_pool", $($arg)+)
    };
}

macro_rules! trace {
    ($($arg:tt)+) => {
        ::log::trace!(target: "http_stream_pool", $($arg)+)
    };
}

macro_rules! warn {
    ($($arg:tt)+) => {
        ::log::warn!(target: "http_stream_pool", $($arg)+)
    };
}

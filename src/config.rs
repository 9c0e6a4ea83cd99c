use std::time::Duration;

/// Tunables shared by every job of a pool.
///
/// The defaults follow what browsers ship with. All setters consume and
/// return `self` so a config can be built in one expression:
///
/// ```
/// use std::time::Duration;
/// use http_stream_pool::Config;
///
/// let config = Config::default()
///     .http2_throttle_delay(Duration::from_millis(100))
///     .connect_timeout(Some(Duration::from_secs(10)));
/// assert_eq!(config.get_http2_throttle_delay(), Duration::from_millis(100));
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    http2_throttle_delay: Duration,
    stream_attempt_delay: Duration,
    slow_attempt_threshold: Duration,
    connect_timeout: Option<Duration>,
    tcp_nodelay: bool,
    tcp_keepalive: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            http2_throttle_delay: Duration::from_millis(300),
            stream_attempt_delay: Duration::from_millis(300),
            slow_attempt_threshold: Duration::from_millis(250),
            connect_timeout: None,
            tcp_nodelay: true,
            tcp_keepalive: None,
        }
    }
}

impl Config {
    /// Delay before a second connection attempt is made to a destination
    /// known to speak HTTP/2, while one attempt is already in flight.
    ///
    /// Default is 300 milliseconds.
    pub fn http2_throttle_delay(mut self, delay: Duration) -> Config {
        self.http2_throttle_delay = delay;
        self
    }

    /// Delay of TCP based attempts while a QUIC attempt is racing them.
    ///
    /// A zero delay starts TCP based attempts right away. Default is 300
    /// milliseconds.
    pub fn stream_attempt_delay(mut self, delay: Duration) -> Config {
        self.stream_attempt_delay = delay;
        self
    }

    /// Time after which a running attempt is reported as slow.
    ///
    /// Slow attempts stop counting against pending demand, so another
    /// attempt may start next to them. Default is 250 milliseconds.
    pub fn slow_attempt_threshold(mut self, threshold: Duration) -> Config {
        self.slow_attempt_threshold = threshold;
        self
    }

    /// Set a timeout for a single connection attempt.
    ///
    /// Default is `None`.
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Config {
        self.connect_timeout = timeout;
        self
    }

    /// Set that all TCP sockets have `SO_NODELAY` set to the supplied value.
    ///
    /// Default is `true`.
    pub fn tcp_nodelay(mut self, enabled: bool) -> Config {
        self.tcp_nodelay = enabled;
        self
    }

    /// Set that all TCP sockets have `SO_KEEPALIVE` set with the supplied duration.
    ///
    /// If `None`, the option will not be set. Default is `None`.
    pub fn tcp_keepalive(mut self, time: Option<Duration>) -> Config {
        self.tcp_keepalive = time;
        self
    }

    /// Returns the HTTP/2 throttle window.
    pub fn get_http2_throttle_delay(&self) -> Duration {
        self.http2_throttle_delay
    }

    /// Returns the TCP attempt delay used while racing QUIC.
    pub fn get_stream_attempt_delay(&self) -> Duration {
        self.stream_attempt_delay
    }

    /// Returns the slow attempt threshold.
    pub fn get_slow_attempt_threshold(&self) -> Duration {
        self.slow_attempt_threshold
    }

    /// Returns the per-attempt connect timeout.
    pub fn get_connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    /// Returns whether `SO_NODELAY` is set on new sockets.
    pub fn get_tcp_nodelay(&self) -> bool {
        self.tcp_nodelay
    }

    /// Returns the keepalive time set on new sockets.
    pub fn get_tcp_keepalive(&self) -> Option<Duration> {
        self.tcp_keepalive
    }
}

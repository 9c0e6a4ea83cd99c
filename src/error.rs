use std::{error::Error as StdError, fmt, io, sync::Arc};

/// A `Result` alias where the `Err` case is `http_stream_pool::Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// A boxed error type that can be used for dynamic error handling.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// The Errors that may occur while establishing streams for a destination.
///
/// An `Error` is cheap to clone. A job-level failure is computed once and
/// every waiting request receives a clone of the same value.
#[derive(Clone)]
pub struct Error {
    inner: Arc<Inner>,
}

struct Inner {
    kind: Kind,
    source: Option<BoxError>,
}

impl Error {
    pub(crate) fn new<E>(kind: Kind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Arc::new(Inner {
                kind,
                source: source.map(Into::into),
            }),
        }
    }

    /// Creates an error for a failed endpoint resolution.
    pub fn resolve<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Resolve, Some(e))
    }

    /// Creates an error for a failed connection attempt.
    pub fn connect<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Connect, Some(e))
    }

    /// Creates an error for a certificate the peer presented and we rejected.
    pub fn certificate<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Certificate, Some(e))
    }

    /// Creates an error for a server that requested a client certificate.
    pub fn client_auth_required() -> Error {
        Error::new(Kind::ClientAuthRequired, None::<Error>)
    }

    /// Creates an error for an operation that did not finish in time.
    pub fn timed_out() -> Error {
        Error::new(Kind::Connect, Some(TimedOut))
    }

    /// Creates an error used to cancel requests on behalf of the caller.
    pub fn canceled() -> Error {
        Error::new(Kind::Canceled, None::<Error>)
    }

    /// Creates an error used when requests are torn down by their owner,
    /// e.g. on a network change.
    pub fn aborted() -> Error {
        Error::new(Kind::Aborted, None::<Error>)
    }

    pub(crate) fn builder<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Builder, Some(e))
    }

    pub(crate) fn name_not_resolved() -> Error {
        Error::new(Kind::Resolve, Some("no usable endpoints were resolved"))
    }

    pub(crate) fn http11_required() -> Error {
        Error::new(Kind::Http11Required, None::<Error>)
    }

    pub(crate) fn preconnect_limit() -> Error {
        Error::new(Kind::PreconnectLimit, None::<Error>)
    }

    pub(crate) fn drained() -> Error {
        Error::new(Kind::Drained, None::<Error>)
    }
}

impl Error {
    /// Returns true if the error is from a type Builder.
    pub fn is_builder(&self) -> bool {
        matches!(self.inner.kind, Kind::Builder)
    }

    /// Returns true if endpoint resolution failed.
    pub fn is_resolve(&self) -> bool {
        matches!(self.inner.kind, Kind::Resolve)
    }

    /// Returns true if the error is related to connect
    pub fn is_connect(&self) -> bool {
        matches!(self.inner.kind, Kind::Connect)
    }

    /// Returns true if the peer's certificate was rejected.
    pub fn is_certificate(&self) -> bool {
        matches!(self.inner.kind, Kind::Certificate)
    }

    /// Returns true if the server asked for a client certificate.
    pub fn is_client_auth_required(&self) -> bool {
        matches!(self.inner.kind, Kind::ClientAuthRequired)
    }

    /// Returns true if the destination only accepts HTTP/1.1.
    pub fn is_http11_required(&self) -> bool {
        matches!(self.inner.kind, Kind::Http11Required)
    }

    /// Returns true if the request was canceled.
    pub fn is_canceled(&self) -> bool {
        matches!(self.inner.kind, Kind::Canceled)
    }

    /// Returns true if the request was aborted by its owner.
    pub fn is_aborted(&self) -> bool {
        matches!(self.inner.kind, Kind::Aborted)
    }

    /// Returns true if a preconnect could not proceed due to socket limits.
    pub fn is_preconnect_limit(&self) -> bool {
        matches!(self.inner.kind, Kind::PreconnectLimit)
    }

    /// Returns true if the job had already finished all of its work.
    pub fn is_drained(&self) -> bool {
        matches!(self.inner.kind, Kind::Drained)
    }

    /// Returns true if the error is related to a timeout.
    pub fn is_timeout(&self) -> bool {
        let mut source = self.source();

        while let Some(err) = source {
            if err.is::<TimedOut>() {
                return true;
            }

            if let Some(io) = err.downcast_ref::<io::Error>() {
                if io.kind() == io::ErrorKind::TimedOut {
                    return true;
                }
            }

            source = err.source();
        }

        false
    }

    /// Returns true if both errors are the same shared value.
    pub fn ptr_eq(&self, other: &Error) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("http_stream_pool::Error");

        builder.field("kind", &self.inner.kind);

        if let Some(ref source) = self.inner.source {
            builder.field("source", source);
        }

        builder.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.inner.kind {
            Kind::Builder => f.write_str("builder error")?,
            Kind::Resolve => f.write_str("error resolving destination")?,
            Kind::Connect => f.write_str("error trying to connect")?,
            Kind::Certificate => f.write_str("invalid peer certificate")?,
            Kind::ClientAuthRequired => f.write_str("client certificate required")?,
            Kind::Http11Required => f.write_str("destination requires HTTP/1.1")?,
            Kind::Canceled => f.write_str("request canceled")?,
            Kind::Aborted => f.write_str("request aborted")?,
            Kind::PreconnectLimit => f.write_str("preconnect blocked by socket limits")?,
            Kind::Drained => f.write_str("job already completed")?,
        };

        if let Some(e) = &self.inner.source {
            write!(f, ": {e}")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source.as_ref().map(|e| &**e as _)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Builder,
    Resolve,
    Connect,
    Certificate,
    ClientAuthRequired,
    Http11Required,
    Canceled,
    Aborted,
    PreconnectLimit,
    Drained,
}

#[derive(Debug)]
pub(crate) struct TimedOut;

impl fmt::Display for TimedOut {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("operation timed out")
    }
}

impl StdError for TimedOut {}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn test_source_chain() {
        let root = Error::new(Kind::Canceled, None::<Error>);
        assert!(root.source().is_none());

        let link = Error::connect(root);
        assert!(link.source().is_some());
        assert_send::<Error>();
        assert_sync::<Error>();
    }

    #[test]
    fn mem_size_of() {
        use std::mem::size_of;
        assert_eq!(size_of::<Error>(), size_of::<usize>());
    }

    #[test]
    fn clones_share_the_same_failure() {
        let err = Error::certificate("bad chain");
        let fanned = err.clone();
        assert!(fanned.ptr_eq(&err));
        assert!(fanned.is_certificate());
        assert!(!Error::certificate("bad chain").ptr_eq(&err));
    }

    #[test]
    fn is_timeout() {
        let err = Error::timed_out();
        assert!(err.is_timeout());
        assert!(err.is_connect());

        let io = io::Error::from(io::ErrorKind::TimedOut);
        let nested = Error::connect(io);
        assert!(nested.is_timeout());

        assert!(!Error::connect("refused").is_timeout());
    }

    #[test]
    fn display_includes_source() {
        let err = Error::resolve("nxdomain");
        assert_eq!(err.to_string(), "error resolving destination: nxdomain");
        assert_eq!(Error::canceled().to_string(), "request canceled");
    }
}

//! DNS resolution
//!
//! The runtime resolves destinations through the [`Resolve`] trait. The
//! default is [`GaiResolver`], which calls `getaddrinfo` on the blocking
//! thread pool.

pub(crate) mod gai;
pub(crate) mod resolve;

pub use self::{
    gai::GaiResolver,
    resolve::{Addrs, IntoResolve, Name, Resolve, Resolving},
};
pub(crate) use self::{
    gai::SocketAddrs,
    resolve::{DnsResolverWithOverrides, DynResolver},
};

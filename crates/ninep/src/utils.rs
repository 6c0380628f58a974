use crate::error;

pub type Result<T> = ::std::result::Result<T, error::Error>;

/// Split a `proto!addr!port`-style listen address, the same shorthand the
/// demo binary's CLI accepts (`"tcp!0.0.0.0!564"`).
pub fn parse_proto(arg: &str) -> Option<(&str, &str, &str)> {
    let mut split = arg.split('!');
    let (proto, addr, port) = (split.next()?, split.next()?, split.next()?);
    Some((proto, addr, port))
}

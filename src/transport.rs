//! Process bootstrap (spec.md §1: out of scope as a core concern, named only
//! as a minimal collaborator): transport acquisition and `--strict` flag
//! handling. Hand-rolled `env::args()` parsing, matching the teacher's
//! `rls/src/main.rs` (no `clap`).

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

/// A duplex byte stream suitable for `codec::frame` — stdio joined into one
/// stream, or a `TcpStream`. Blanket-implemented so `acquire` can return
/// either shape behind one boxed trait object.
pub trait Duplex: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Duplex for T {}

/// Parsed command-line options (spec.md §6: "`--strict` selects whether the
/// file system is remote... or local").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub strict: bool,
    pub listen: Option<SocketAddr>,
}

impl Default for Options {
    fn default() -> Self {
        Options { strict: false, listen: None }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArgsError {
    #[error("--listen requires a socket address argument")]
    MissingListenAddr,
    #[error("invalid socket address `{0}`")]
    InvalidListenAddr(String),
    #[error("unknown argument `{0}`")]
    Unknown(String),
}

/// Parses `args` (typically `env::args().skip(1)`) into `Options`.
pub fn parse_args<I: Iterator<Item = String>>(mut args: I) -> Result<Options, ArgsError> {
    let mut options = Options::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--strict" => options.strict = true,
            "--listen" => {
                let addr = args.next().ok_or(ArgsError::MissingListenAddr)?;
                options.listen =
                    Some(addr.parse().map_err(|_| ArgsError::InvalidListenAddr(addr))?);
            }
            other => return Err(ArgsError::Unknown(other.to_owned())),
        }
    }
    Ok(options)
}

/// Acquires the transport `options` selects: a bound TCP connection if
/// `--listen` was given (this process accepts exactly one connection and
/// serves it, matching the teacher's one-server-per-process model), or stdio
/// otherwise.
pub async fn acquire(options: &Options) -> std::io::Result<Box<dyn Duplex>> {
    match options.listen {
        Some(addr) => {
            let listener = TcpListener::bind(addr).await?;
            let (stream, _peer) = listener.accept().await?;
            Ok(Box::new(stream) as Box<dyn Duplex>)
        }
        None => Ok(Box::new(tokio::io::join(tokio::io::stdin(), tokio::io::stdout())) as Box<dyn Duplex>),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strict_flag() {
        let options = parse_args(vec!["--strict".to_string()].into_iter()).unwrap();
        assert!(options.strict);
        assert!(options.listen.is_none());
    }

    #[test]
    fn parses_listen_address() {
        let options =
            parse_args(vec!["--listen".to_string(), "127.0.0.1:9257".to_string()].into_iter()).unwrap();
        assert_eq!(options.listen, Some("127.0.0.1:9257".parse().unwrap()));
    }

    #[test]
    fn rejects_unknown_arguments() {
        let err = parse_args(vec!["--bogus".to_string()].into_iter()).unwrap_err();
        assert!(matches!(err, ArgsError::Unknown(arg) if arg == "--bogus"));
    }

    #[test]
    fn listen_without_an_address_is_an_error() {
        let err = parse_args(vec!["--listen".to_string()].into_iter()).unwrap_err();
        assert!(matches!(err, ArgsError::MissingListenAddr));
    }
}

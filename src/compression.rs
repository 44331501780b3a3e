//! permessage-deflate (RFC 7692): extension negotiation and the per-connection codecs.
use std::io;

use bytes::BytesMut;
use flate2::{FlushCompress, FlushDecompress, Status};
use nom::{
    bytes::complete::{tag, take_while1},
    character::complete::{digit1, space0},
    combinator::opt,
    sequence::{pair, preceded},
    IResult, Parser,
};

use crate::{CompressionLevel, DeflateOptions, Role, WebSocketError};

static PERMESSAGE_DEFLATE: &str = "permessage-deflate";

/// Trailer removed from every compressed message and restored before inflating it.
const DEFLATE_TAIL: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Parameters of the `permessage-deflate` extension as carried by `Sec-WebSocket-Extensions`.
///
/// A client sends its offer built from [`DeflateOptions`] and adopts whatever the server answers.
/// A server [`merges`](WebSocketExtensions::merge) the client's offer with its own options and
/// answers with the result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebSocketExtensions {
    pub(crate) server_max_window_bits: Option<u8>,
    pub(crate) client_max_window_bits: Option<u8>,
    pub(crate) server_no_context_takeover: bool,
    pub(crate) client_no_context_takeover: bool,
}

impl From<&DeflateOptions> for WebSocketExtensions {
    fn from(value: &DeflateOptions) -> Self {
        Self {
            #[cfg(feature = "zlib")]
            server_max_window_bits: value.server_max_window_bits,
            #[cfg(not(feature = "zlib"))]
            server_max_window_bits: None,
            #[cfg(feature = "zlib")]
            client_max_window_bits: value.client_max_window_bits,
            #[cfg(not(feature = "zlib"))]
            client_max_window_bits: None,
            server_no_context_takeover: value.server_no_context_takeover,
            client_no_context_takeover: value.client_no_context_takeover,
        }
    }
}

impl std::fmt::Display for WebSocketExtensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(PERMESSAGE_DEFLATE)?;

        for (name, bits) in [
            ("server_max_window_bits", self.server_max_window_bits),
            ("client_max_window_bits", self.client_max_window_bits),
        ] {
            match bits {
                Some(bits) if (9..16).contains(&bits) => write!(f, "; {name}={bits}")?,
                Some(_) => write!(f, "; {name}")?,
                None => {}
            }
        }
        if self.server_no_context_takeover {
            f.write_str("; server_no_context_takeover")?;
        }
        if self.client_no_context_takeover {
            f.write_str("; client_no_context_takeover")?;
        }

        Ok(())
    }
}

impl WebSocketExtensions {
    /// Combines a client offer with the server's own options.
    ///
    /// Context takeover is disabled when either side asks for it; window bits take the smaller
    /// of both sides.
    pub(crate) fn merge(offered: &Self, local: &DeflateOptions) -> Self {
        let local = Self::from(local);
        let min_bits = |offered: Option<u8>, local: Option<u8>| match (offered, local) {
            (Some(o), Some(l)) => Some(o.min(l)),
            (o, l) => o.or(l),
        };

        Self {
            client_no_context_takeover: offered.client_no_context_takeover
                || local.client_no_context_takeover,
            server_no_context_takeover: offered.server_no_context_takeover
                || local.server_no_context_takeover,
            client_max_window_bits: min_bits(
                offered.client_max_window_bits,
                local.client_max_window_bits,
            ),
            server_max_window_bits: min_bits(
                offered.server_max_window_bits,
                local.server_max_window_bits,
            ),
        }
    }

    /// Builds the compressor for outgoing messages of `role`.
    pub(crate) fn compressor(&self, role: Role, level: CompressionLevel) -> Compressor {
        let (no_context_takeover, window_bits) = match role {
            Role::Client => (self.client_no_context_takeover, self.client_max_window_bits),
            Role::Server => (self.server_no_context_takeover, self.server_max_window_bits),
        };

        log::debug!(
            "Established compressor for {role} with no_context_takeover={no_context_takeover}"
        );

        Compressor::new(level, window_bits, no_context_takeover)
    }

    /// Builds the decompressor for messages the peer of `role` sends.
    pub(crate) fn decompressor(&self, role: Role) -> Decompressor {
        let (no_context_takeover, window_bits) = match role {
            Role::Server => (self.client_no_context_takeover, self.client_max_window_bits),
            Role::Client => (self.server_no_context_takeover, self.server_max_window_bits),
        };

        log::debug!(
            "Established decompressor for {role} with no_context_takeover={no_context_takeover}"
        );

        Decompressor::new(window_bits, no_context_takeover)
    }

    fn parse(input: &str) -> IResult<&str, Self> {
        let head: IResult<&str, &str> = tag(PERMESSAGE_DEFLATE).parse(input);
        let (mut input, _) = head?;
        let mut this = Self::default();

        while !input.is_empty() {
            let (remaining, (key, value)) = Self::parse_param(input)?;
            // a window bits parameter without a value only announces support
            let bits = || value.and_then(|v| v.parse::<u8>().ok()).unwrap_or_default();
            match key {
                "client_no_context_takeover" => this.client_no_context_takeover = true,
                "server_no_context_takeover" => this.server_no_context_takeover = true,
                "server_max_window_bits" => this.server_max_window_bits = Some(bits()),
                "client_max_window_bits" => this.client_max_window_bits = Some(bits()),
                _ => log::debug!("ignoring unknown permessage-deflate parameter {key}"),
            }
            input = remaining;
        }

        Ok((input, this))
    }

    /// `; key` or `; key=digits`
    fn parse_param(input: &str) -> IResult<&str, (&str, Option<&str>)> {
        preceded(
            (space0, tag(";"), space0),
            pair(
                take_while1(|c: char| c.is_alphanumeric() || c == '_'),
                opt(preceded(tag("="), digit1)),
            ),
        )
        .parse(input)
    }
}

/// Parses the first `permessage-deflate` offer of a `Sec-WebSocket-Extensions` value.
impl std::str::FromStr for WebSocketExtensions {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        input
            .split(',')
            .map(str::trim)
            .find_map(|offer| Self::parse(offer).ok().map(|(_, this)| this))
            .ok_or_else(|| format!("no valid {PERMESSAGE_DEFLATE} offer in {input:?}"))
    }
}

/// Keeps `out` with at least `min` bytes of spare capacity for flate2's `*_vec` calls.
fn reserve_spare(out: &mut Vec<u8>, min: usize) {
    if out.capacity() - out.len() < min {
        out.reserve(min.max(out.len()));
    }
}

fn deflate_error(err: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, format!("Compression error: {err}"))
}

fn inflate_error(err: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("Decompression error: {err}"))
}

/// Compresses outgoing messages.
pub struct Compressor {
    compress: flate2::Compress,
    no_context_takeover: bool,
}

impl Compressor {
    /// Creates a compressor. `window_bits` is honoured only with the `zlib` feature and a value
    /// in `9..=15`.
    pub fn new(level: CompressionLevel, window_bits: Option<u8>, no_context_takeover: bool) -> Self {
        #[cfg(feature = "zlib")]
        let compress = match window_bits.filter(|bits| (9..16).contains(bits)) {
            Some(bits) => flate2::Compress::new_with_window_bits(level, false, bits),
            None => flate2::Compress::new(level, false),
        };
        #[cfg(not(feature = "zlib"))]
        let compress = {
            let _ = window_bits;
            flate2::Compress::new(level, false)
        };

        Self {
            compress,
            no_context_takeover,
        }
    }

    /// Compresses one complete message, returning the deflate stream without its sync trailer.
    pub fn compress(&mut self, mut input: &[u8]) -> io::Result<BytesMut> {
        if self.no_context_takeover {
            self.compress.reset();
        }

        let mut out = Vec::with_capacity(input.len() / 2 + 64);

        while !input.is_empty() {
            reserve_spare(&mut out, 1024);
            let before_in = self.compress.total_in();
            let status = self
                .compress
                .compress_vec(input, &mut out, FlushCompress::None)
                .map_err(deflate_error)?;
            let consumed = (self.compress.total_in() - before_in) as usize;
            input = &input[consumed..];

            if !matches!(status, Status::Ok) {
                return Err(deflate_error("corrupt deflate stream"));
            }
        }

        // a full output buffer means the sync flush has more to emit
        loop {
            reserve_spare(&mut out, 1024);
            self.compress
                .compress_vec(&[], &mut out, FlushCompress::Sync)
                .map_err(deflate_error)?;
            if out.len() < out.capacity() {
                break;
            }
        }

        if out.ends_with(&DEFLATE_TAIL) {
            out.truncate(out.len() - DEFLATE_TAIL.len());
        }

        Ok(BytesMut::from(&out[..]))
    }
}

/// Inflates incoming messages.
pub struct Decompressor {
    decompress: flate2::Decompress,
    no_context_takeover: bool,
}

impl Decompressor {
    /// Creates a decompressor. `window_bits` is honoured only with the `zlib` feature and a value
    /// in `9..=15`.
    pub fn new(window_bits: Option<u8>, no_context_takeover: bool) -> Self {
        #[cfg(feature = "zlib")]
        let decompress = match window_bits.filter(|bits| (9..16).contains(bits)) {
            Some(bits) => flate2::Decompress::new_with_window_bits(false, bits),
            None => flate2::Decompress::new(false),
        };
        #[cfg(not(feature = "zlib"))]
        let decompress = {
            let _ = window_bits;
            flate2::Decompress::new(false)
        };

        Self {
            decompress,
            no_context_takeover,
        }
    }

    /// Inflates one complete message. Output beyond `max_size` bytes fails with
    /// [`WebSocketError::FrameTooLarge`].
    pub fn decompress(&mut self, input: &[u8], max_size: usize) -> crate::Result<BytesMut> {
        if self.no_context_takeover {
            self.decompress.reset(false);
        }

        let mut out = Vec::with_capacity((input.len() * 2).min(max_size) + 64);

        for mut data in [input, &DEFLATE_TAIL[..]] {
            loop {
                reserve_spare(&mut out, 1024);
                let before_in = self.decompress.total_in();
                let before_out = self.decompress.total_out();

                self.decompress
                    .decompress_vec(data, &mut out, FlushDecompress::Sync)
                    .map_err(inflate_error)?;

                let consumed = (self.decompress.total_in() - before_in) as usize;
                let produced = self.decompress.total_out() - before_out;
                data = &data[consumed..];

                if out.len() > max_size {
                    return Err(WebSocketError::FrameTooLarge);
                }
                if (data.is_empty() && out.len() < out.capacity()) || (consumed == 0 && produced == 0)
                {
                    break;
                }
            }
        }

        Ok(BytesMut::from(&out[..]))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use flate2::Compression;

    use super::*;

    #[test]
    fn test_parse_extensions() {
        let ext = WebSocketExtensions::from_str("permessage-deflate; client_no_context_takeover; server_max_window_bits=7; client_max_window_bits=2; server_no_context_takeover").unwrap();
        assert!(ext.client_no_context_takeover);
        assert!(ext.server_no_context_takeover);
        assert_eq!(ext.server_max_window_bits, Some(7));
        assert_eq!(ext.client_max_window_bits, Some(2));
    }

    #[test]
    fn test_parse_extensions_fail() {
        assert!(WebSocketExtensions::from_str("permessage-deflate; client_max_window_bits=").is_err());
        assert!(WebSocketExtensions::from_str("foo, bar; baz=1").is_err());
        assert!(WebSocketExtensions::from_str(
            "permessage-deflate; client_no_context_takeover server_max_window_bits=7"
        )
        .is_err());
    }

    #[test]
    fn test_parse_picks_first_valid_offer() {
        let ext = WebSocketExtensions::from_str(
            "x-webkit-deflate-frame, permessage-deflate; client_max_window_bits",
        )
        .unwrap();
        assert_eq!(ext.client_max_window_bits, Some(0));
    }

    #[test]
    fn test_display_roundtrips_through_parser() {
        let ext = WebSocketExtensions {
            server_max_window_bits: Some(10),
            client_max_window_bits: Some(0),
            server_no_context_takeover: true,
            client_no_context_takeover: false,
        };
        let text = ext.to_string();
        assert_eq!(
            text,
            "permessage-deflate; server_max_window_bits=10; client_max_window_bits; server_no_context_takeover"
        );
        assert_eq!(WebSocketExtensions::from_str(&text).unwrap(), ext);
    }

    #[test]
    fn test_merge_prefers_restrictions() {
        let offered = WebSocketExtensions {
            client_no_context_takeover: true,
            ..Default::default()
        };
        let local = DeflateOptions {
            server_no_context_takeover: true,
            ..Default::default()
        };

        let merged = WebSocketExtensions::merge(&offered, &local);
        assert!(merged.client_no_context_takeover);
        assert!(merged.server_no_context_takeover);
    }

    #[test]
    fn test_compress_strips_tail_and_inflates() {
        let mut compressor = Compressor::new(Compression::default(), None, false);
        let mut decompressor = Decompressor::new(None, false);

        for _ in 0..3 {
            let data = b"hello hello hello hello hello";
            let compressed = compressor.compress(data).unwrap();
            assert!(!compressed.ends_with(&DEFLATE_TAIL));

            let inflated = decompressor.decompress(&compressed, 1024).unwrap();
            assert_eq!(&inflated[..], &data[..]);
        }
    }

    #[test]
    fn test_no_context_takeover() {
        let mut compressor = Compressor::new(Compression::default(), None, true);
        let mut decompressor = Decompressor::new(None, true);

        let first = compressor.compress(b"sample data").unwrap();
        let second = compressor.compress(b"sample data").unwrap();
        assert_eq!(first, second);

        assert_eq!(&decompressor.decompress(&first, 64).unwrap()[..], b"sample data");
        assert_eq!(&decompressor.decompress(&second, 64).unwrap()[..], b"sample data");
    }

    #[test]
    fn test_large_message_and_limit() {
        let data = vec![b'a'; 200_000];
        let mut compressor = Compressor::new(Compression::default(), None, false);
        let compressed = compressor.compress(&data).unwrap();
        assert!(compressed.len() < data.len());

        let mut decompressor = Decompressor::new(None, false);
        assert_eq!(decompressor.decompress(&compressed, 300_000).unwrap().len(), 200_000);

        let mut limited = Decompressor::new(None, false);
        assert!(matches!(
            limited.decompress(&compressed, 1000),
            Err(WebSocketError::FrameTooLarge)
        ));
    }
}

//! Uncompressed wire form (RFC 1035 §3.2, RFC 3597).
//!
//! Resolver answers are decoded through here. Names are never compressed and must be
//! absolute.

use super::name::is_fqdn;
use super::{Class, RData, Record, RrType, Txt};
use crate::error::Error;
use std::net::{Ipv4Addr, Ipv6Addr};

fn wire_err(msg: impl Into<String>) -> Error {
    Error::Validation(format!("wire format: {}", msg.into()))
}

/// Split a presentation name into raw labels, resolving `\X` and `\DDD` escapes.
fn name_labels(name: &str) -> Result<Vec<Vec<u8>>, Error> {
    if !is_fqdn(name) {
        return Err(wire_err(format!("\"{name}\" is not absolute")));
    }
    if name == "." {
        return Ok(Vec::new());
    }
    let mut labels = Vec::new();
    let mut label = Vec::new();
    let mut bytes = name[..name.len() - 1].bytes();
    while let Some(b) = bytes.next() {
        match b {
            b'.' => labels.push(std::mem::take(&mut label)),
            b'\\' => {
                let next = bytes.next().ok_or_else(|| wire_err("dangling escape"))?;
                if next.is_ascii_digit() {
                    let d2 = bytes.next().ok_or_else(|| wire_err("short \\DDD escape"))?;
                    let d3 = bytes.next().ok_or_else(|| wire_err("short \\DDD escape"))?;
                    let value = u32::from(next - b'0') * 100
                        + u32::from(d2.wrapping_sub(b'0')) * 10
                        + u32::from(d3.wrapping_sub(b'0'));
                    label.push(u8::try_from(value).map_err(|_| wire_err("escape out of range"))?);
                } else {
                    label.push(next);
                }
            }
            other => label.push(other),
        }
    }
    labels.push(label);
    if labels.iter().any(|l| l.is_empty() || l.len() > 63) {
        return Err(wire_err(format!("invalid label in \"{name}\"")));
    }
    Ok(labels)
}

fn put_name(out: &mut Vec<u8>, name: &str) -> Result<(), Error> {
    let start = out.len();
    for label in name_labels(name)? {
        // Length checked by name_labels.
        out.push(label.len() as u8);
        out.extend_from_slice(&label);
    }
    out.push(0);
    if out.len() - start > 255 {
        return Err(wire_err(format!("\"{name}\" is longer than 255 octets")));
    }
    Ok(())
}

fn put_string(out: &mut Vec<u8>, s: &[u8]) -> Result<(), Error> {
    let len = u8::try_from(s.len()).map_err(|_| wire_err("character-string too long"))?;
    out.push(len);
    out.extend_from_slice(s);
    Ok(())
}

fn utf8(bytes: &[u8]) -> Result<String, Error> {
    String::from_utf8(bytes.to_vec()).map_err(|_| wire_err("character-string is not UTF-8"))
}

fn put_hex(out: &mut Vec<u8>, s: &str) -> Result<(), Error> {
    out.extend(hex::decode(s).map_err(|_| wire_err("invalid hex"))?);
    Ok(())
}

impl RData {
    /// Encode the record data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] for types only kept in presentation form, and
    /// [`Error::Validation`] for relative names or over-long strings.
    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        match self {
            RData::A { a } => out.extend_from_slice(&a.octets()),
            RData::AAAA { aaaa } => out.extend_from_slice(&aaaa.octets()),
            RData::NS { ns: name }
            | RData::CNAME { target: name }
            | RData::PTR { ptr: name }
            | RData::DNAME { target: name } => put_name(&mut out, name)?,
            RData::MX { preference, mx } => {
                out.extend_from_slice(&preference.to_be_bytes());
                put_name(&mut out, mx)?;
            }
            RData::SOA {
                ns,
                mbox,
                serial,
                refresh,
                retry,
                expire,
                minttl,
            } => {
                put_name(&mut out, ns)?;
                put_name(&mut out, mbox)?;
                for v in [serial, refresh, retry, expire, minttl] {
                    out.extend_from_slice(&v.to_be_bytes());
                }
            }
            RData::TXT(txt) => {
                for chunk in txt.chunks() {
                    put_string(&mut out, &chunk)?;
                }
            }
            RData::SRV {
                priority,
                weight,
                port,
                target,
            } => {
                for v in [priority, weight, port] {
                    out.extend_from_slice(&v.to_be_bytes());
                }
                put_name(&mut out, target)?;
            }
            RData::CAA { flag, tag, value } => {
                out.push(*flag);
                put_string(&mut out, tag.as_bytes())?;
                out.extend_from_slice(value.as_bytes());
            }
            RData::TLSA {
                usage,
                selector,
                matching_type,
                certificate,
            } => {
                out.extend_from_slice(&[*usage, *selector, *matching_type]);
                put_hex(&mut out, certificate)?;
            }
            RData::SSHFP {
                algorithm,
                fp_type,
                fingerprint,
            } => {
                out.extend_from_slice(&[*algorithm, *fp_type]);
                put_hex(&mut out, fingerprint)?;
            }
            RData::DS {
                key_tag,
                algorithm,
                digest_type,
                digest,
            } => {
                out.extend_from_slice(&key_tag.to_be_bytes());
                out.extend_from_slice(&[*algorithm, *digest_type]);
                put_hex(&mut out, digest)?;
            }
            RData::NAPTR {
                order,
                preference,
                flags,
                service,
                regexp,
                replacement,
            } => {
                out.extend_from_slice(&order.to_be_bytes());
                out.extend_from_slice(&preference.to_be_bytes());
                put_string(&mut out, flags.as_bytes())?;
                put_string(&mut out, service.as_bytes())?;
                put_string(&mut out, regexp.as_bytes())?;
                put_name(&mut out, replacement)?;
            }
            RData::Other { .. } => return Err(Error::Unsupported("wire encoding of this type")),
            RData::Unknown { data, .. } => out.extend_from_slice(data),
        }
        Ok(out)
    }

    /// Decode record data of type `rrtype`. Types without a structured form decode to
    /// [`RData::Unknown`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] on truncated or malformed data.
    pub fn from_wire(rrtype: RrType, data: &[u8]) -> Result<RData, Error> {
        let mut r = Reader { buf: data, pos: 0 };
        let rdata = match rrtype {
            RrType::A => {
                let b = r.take(4)?;
                RData::A {
                    a: Ipv4Addr::new(b[0], b[1], b[2], b[3]),
                }
            }
            RrType::AAAA => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(r.take(16)?);
                RData::AAAA {
                    aaaa: Ipv6Addr::from(octets),
                }
            }
            RrType::NS => RData::NS { ns: r.name()? },
            RrType::CNAME => RData::CNAME { target: r.name()? },
            RrType::PTR => RData::PTR { ptr: r.name()? },
            RrType::DNAME => RData::DNAME { target: r.name()? },
            RrType::MX => RData::MX {
                preference: r.u16()?,
                mx: r.name()?,
            },
            RrType::SOA => RData::SOA {
                ns: r.name()?,
                mbox: r.name()?,
                serial: r.u32()?,
                refresh: r.u32()?,
                retry: r.u32()?,
                expire: r.u32()?,
                minttl: r.u32()?,
            },
            RrType::TXT => {
                let mut segments = Vec::new();
                while !r.is_empty() {
                    segments.push(r.octets()?.to_vec());
                }
                RData::TXT(Txt::from_segments(segments))
            }
            RrType::SRV => RData::SRV {
                priority: r.u16()?,
                weight: r.u16()?,
                port: r.u16()?,
                target: r.name()?,
            },
            RrType::CAA => RData::CAA {
                flag: r.u8()?,
                tag: r.string()?,
                value: utf8(r.rest())?,
            },
            RrType::TLSA => RData::TLSA {
                usage: r.u8()?,
                selector: r.u8()?,
                matching_type: r.u8()?,
                certificate: hex::encode(r.rest()),
            },
            RrType::SSHFP => RData::SSHFP {
                algorithm: r.u8()?,
                fp_type: r.u8()?,
                fingerprint: hex::encode(r.rest()),
            },
            RrType::DS => RData::DS {
                key_tag: r.u16()?,
                algorithm: r.u8()?,
                digest_type: r.u8()?,
                digest: hex::encode(r.rest()),
            },
            RrType::NAPTR => RData::NAPTR {
                order: r.u16()?,
                preference: r.u16()?,
                flags: r.string()?,
                service: r.string()?,
                regexp: r.string()?,
                replacement: r.name()?,
            },
            other => {
                return Ok(RData::Unknown {
                    rrtype: other.0,
                    data: data.to_vec(),
                })
            }
        };
        if !r.is_empty() {
            return Err(wire_err(format!("trailing data in {rrtype} record")));
        }
        Ok(rdata)
    }
}

impl Record {
    /// Encode the whole record. The owner and all rdata names must be absolute.
    ///
    /// # Errors
    ///
    /// See [`RData::to_wire`].
    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        let rdata = self.data.to_wire()?;
        let rdlen = u16::try_from(rdata.len()).map_err(|_| wire_err("rdata too long"))?;
        let mut out = Vec::with_capacity(rdata.len() + self.name.len() + 12);
        put_name(&mut out, &self.name)?;
        out.extend_from_slice(&self.rr_type().0.to_be_bytes());
        out.extend_from_slice(&Class::CODE_IN.to_be_bytes());
        out.extend_from_slice(&self.ttl.to_be_bytes());
        out.extend_from_slice(&rdlen.to_be_bytes());
        out.extend(rdata);
        Ok(out)
    }

    /// Decode one record from the front of `buf`, returning it and the octets consumed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedClass`] for classes other than `IN` and
    /// [`Error::Validation`] for malformed data.
    pub fn from_wire(buf: &[u8]) -> Result<(Record, usize), Error> {
        let mut r = Reader { buf, pos: 0 };
        let name = r.name()?;
        let rrtype = RrType(r.u16()?);
        let class = r.u16()?;
        if class != Class::CODE_IN {
            return Err(Error::UnsupportedClass(format!("CLASS{class}")));
        }
        let ttl = r.u32()?;
        let rdlen = usize::from(r.u16()?);
        let data = RData::from_wire(rrtype, r.take(rdlen)?)?;
        Ok((
            Record {
                name,
                class: Class::IN,
                ttl,
                data,
            },
            r.pos,
        ))
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.buf.len());
        let end = end.ok_or_else(|| wire_err("truncated data"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos.min(self.buf.len())..];
        self.pos = self.buf.len();
        slice
    }

    fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, Error> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, Error> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn octets(&mut self) -> Result<&'a [u8], Error> {
        let len = usize::from(self.u8()?);
        self.take(len)
    }

    fn string(&mut self) -> Result<String, Error> {
        utf8(self.octets()?)
    }

    fn name(&mut self) -> Result<String, Error> {
        let mut name = String::new();
        loop {
            let len = self.u8()?;
            if len == 0 {
                break;
            }
            if len & 0xC0 != 0 {
                return Err(wire_err("compressed names are not supported"));
            }
            for &b in self.take(usize::from(len))? {
                match b {
                    b'.' | b'\\' => {
                        name.push('\\');
                        name.push(char::from(b));
                    }
                    0x21..=0x7e => name.push(char::from(b)),
                    _ => name.push_str(&format!("\\{b:03}")),
                }
            }
            name.push('.');
        }
        if name.is_empty() {
            name.push('.');
        }
        Ok(name)
    }
}

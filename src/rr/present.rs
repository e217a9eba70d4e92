//! Presentation (master-file text) form.

use super::{RData, Record, RrType};
use std::fmt::{self, Write};

fn write_escaped(f: &mut impl Write, s: &str) -> fmt::Result {
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            c if (c as u32) < 0x20 || c as u32 == 0x7f => write!(f, "\\{:03}", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    Ok(())
}

fn write_quoted(f: &mut impl Write, s: &str) -> fmt::Result {
    f.write_char('"')?;
    write_escaped(f, s)?;
    f.write_char('"')
}

/// Quote raw octets: UTF-8 runs are written as text, every other octet as `\DDD`.
fn write_quoted_bytes(f: &mut impl Write, mut bytes: &[u8]) -> fmt::Result {
    f.write_char('"')?;
    loop {
        match std::str::from_utf8(bytes) {
            Ok(s) => {
                write_escaped(f, s)?;
                break;
            }
            Err(err) => {
                let (valid, rest) = bytes.split_at(err.valid_up_to());
                // `valid` was just checked.
                write_escaped(f, std::str::from_utf8(valid).unwrap_or_default())?;
                let bad = err.error_len().unwrap_or(rest.len());
                for b in &rest[..bad] {
                    write!(f, "\\{b:03}")?;
                }
                bytes = &rest[bad..];
            }
        }
    }
    f.write_char('"')
}

fn name_or_apex(name: &str) -> &str {
    if name.is_empty() {
        "@"
    } else {
        name
    }
}

impl fmt::Display for RData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RData::A { a } => write!(f, "{a}"),
            RData::AAAA { aaaa } => write!(f, "{aaaa}"),
            RData::NS { ns: name }
            | RData::CNAME { target: name }
            | RData::PTR { ptr: name }
            | RData::DNAME { target: name } => f.write_str(name_or_apex(name)),
            RData::MX { preference, mx } => write!(f, "{preference} {}", name_or_apex(mx)),
            RData::SOA {
                ns,
                mbox,
                serial,
                refresh,
                retry,
                expire,
                minttl,
            } => write!(
                f,
                "{} {} {serial} {refresh} {retry} {expire} {minttl}",
                name_or_apex(ns),
                name_or_apex(mbox)
            ),
            RData::TXT(txt) => {
                for (i, chunk) in txt.chunks().iter().enumerate() {
                    if i > 0 {
                        f.write_char(' ')?;
                    }
                    write_quoted_bytes(f, chunk)?;
                }
                Ok(())
            }
            RData::SRV {
                priority,
                weight,
                port,
                target,
            } => write!(f, "{priority} {weight} {port} {}", name_or_apex(target)),
            RData::CAA { flag, tag, value } => {
                write!(f, "{flag} {tag} ")?;
                write_quoted(f, value)
            }
            RData::TLSA {
                usage,
                selector,
                matching_type,
                certificate,
            } => write!(f, "{usage} {selector} {matching_type} {certificate}"),
            RData::SSHFP {
                algorithm,
                fp_type,
                fingerprint,
            } => write!(f, "{algorithm} {fp_type} {fingerprint}"),
            RData::DS {
                key_tag,
                algorithm,
                digest_type,
                digest,
            } => write!(f, "{key_tag} {algorithm} {digest_type} {digest}"),
            RData::NAPTR {
                order,
                preference,
                flags,
                service,
                regexp,
                replacement,
            } => {
                write!(f, "{order} {preference} ")?;
                write_quoted(f, flags)?;
                f.write_char(' ')?;
                write_quoted(f, service)?;
                f.write_char(' ')?;
                write_quoted(f, regexp)?;
                write!(f, " {}", name_or_apex(replacement))
            }
            RData::Other { fields, .. } => f.write_str(&fields.join(" ")),
            RData::Unknown { data, .. } => {
                write!(f, "\\# {}", data.len())?;
                if !data.is_empty() {
                    write!(f, " {}", hex::encode(data))?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rrtype: RrType = self.rr_type();
        write!(
            f,
            "{}\t{}\tIN\t{rrtype}\t{}",
            name_or_apex(&self.name),
            self.ttl,
            self.data
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::rr::{emit_rr, parse_rr, parse_zone, RData, Record, Txt};

    const ORIGIN: &str = "example.com.";

    #[test]
    fn parse_emit_parse_is_stable() {
        let zone = r#"
@ 3600 IN SOA ns1 hostmaster 1 7200 3600 1209600 3600
@ 3600 IN NS ns1
@ 3600 IN MX 10 mail
@ 3600 IN TXT "v=spf1 include:_spf.example.com ~all"
@ 3600 IN TXT "part one" "part two"
@ 3600 IN CAA 0 issue "letsencrypt.org"
_sip._tcp 300 IN SRV 10 60 5060 sip.example.net.
_443._tcp.www 300 IN TLSA 3 1 1 ABCDEF0123
www 300 IN A 192.0.2.1
www 300 IN AAAA 2001:DB8::1
www 300 IN SSHFP 1 2 aBcD
alias 300 IN CNAME www
sub 300 IN NS a.ns.example.
sub 300 IN DS 12345 13 2 ABCD EF01
@ 300 IN NAPTR 100 10 "S" "SIP+D2U" "" _sip._udp
@ 300 IN HINFO "PC" "Linux"
@ 300 IN TYPE65280 \# 2 beef
"#;
        let records = parse_zone(zone, ORIGIN).unwrap();
        assert_eq!(records.len(), 17);
        for rr in &records {
            let text = emit_rr(rr, ORIGIN);
            let back = parse_rr(&text, ORIGIN).unwrap();
            assert_eq!(&back, rr, "{text}");
        }
    }

    #[test]
    fn hex_and_addresses_are_canonical_when_presented() {
        let rr = parse_rr("www 300 AAAA 2001:DB8:0:0::1", ORIGIN).unwrap();
        assert_eq!(rr.rdata_text(), "2001:db8::1");
        let rr = parse_rr("_443._tcp 300 TLSA 3 1 1 ABCD EF", ORIGIN).unwrap();
        assert_eq!(rr.rdata_text(), "3 1 1 abcdef");
    }

    #[test]
    fn relative_records_present_with_apex_marker() {
        let rr = Record::new("@", 300, RData::TXT(Txt::new("hello \"world\"")));
        assert_eq!(rr.to_string(), "@\t300\tIN\tTXT\t\"hello \\\"world\\\"\"");
    }

    #[test]
    fn recorded_segmentation_is_presented() {
        let rr = parse_rr("@ 300 TXT \"a\" \"b\"", ORIGIN).unwrap();
        assert_eq!(rr.rdata_text(), "\"a\" \"b\"");
    }

    #[test]
    fn txt_octets_round_trip_exactly() {
        let rr = parse_rr(r#"@ 300 TXT "\255\000" "caf\195\169 \128""#, ORIGIN).unwrap();
        let RData::TXT(txt) = &rr.data else {
            panic!("unexpected rdata {:?}", rr.data);
        };
        assert_eq!(txt.as_bytes(), b"\xff\x00caf\xc3\xa9 \x80");
        assert_eq!(txt.as_str(), None);
        assert_eq!(rr.txt(), None);
        assert_eq!(rr.rdata_text(), r#""\255\000" "café \128""#);
        assert_eq!(parse_rr(&emit_rr(&rr, ORIGIN), ORIGIN).unwrap(), rr);

        let other = parse_rr(r#"@ 300 TXT "\254\000""#, ORIGIN).unwrap();
        assert_ne!(other, rr);
        let json = serde_json::to_string(&rr).unwrap();
        assert_eq!(serde_json::from_str::<Record>(&json).unwrap(), rr);
    }
}

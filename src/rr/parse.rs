//! RFC 1035 master-file parsing.
//!
//! The scanner turns the text into logical entries (one per record or directive, with
//! parenthesized continuations folded in), then each entry is resolved against the current
//! `$ORIGIN`, `$TTL`, and the previous record's owner.

use super::name::absolute_name;
use super::{Class, RData, Record, RrType, Txt, DEFAULT_TTL};
use crate::error::Error;
use std::net::{Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone)]
struct Token {
    text: String,
    quoted: bool,
}

#[derive(Debug)]
struct Entry {
    line: usize,
    leading_blank: bool,
    tokens: Vec<Token>,
}

fn scan(text: &str) -> Result<Vec<Entry>, Error> {
    let mut entries = Vec::new();
    let mut tokens: Vec<Token> = Vec::new();
    let mut depth = 0usize;
    let mut line = 1usize;
    let mut entry_line = 1usize;
    let mut line_start = true;
    let mut leading_blank = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\n' => {
                line += 1;
                if depth == 0 {
                    if !tokens.is_empty() {
                        entries.push(Entry {
                            line: entry_line,
                            leading_blank,
                            tokens: std::mem::take(&mut tokens),
                        });
                    }
                    line_start = true;
                    leading_blank = false;
                }
            }
            ';' => {
                while let Some(&next) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            ' ' | '\t' | '\r' => {
                if line_start && tokens.is_empty() && depth == 0 {
                    leading_blank = true;
                }
                line_start = false;
            }
            '(' => {
                depth += 1;
                line_start = false;
            }
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| Error::syntax(line, "unbalanced closing parenthesis"))?;
            }
            '"' => {
                if tokens.is_empty() {
                    entry_line = line;
                }
                let mut s = String::new();
                let mut closed = false;
                while let Some(next) = chars.next() {
                    match next {
                        '\\' => {
                            s.push('\\');
                            if let Some(escaped) = chars.next() {
                                if escaped == '\n' {
                                    line += 1;
                                }
                                s.push(escaped);
                            }
                        }
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\n' => {
                            line += 1;
                            s.push('\n');
                        }
                        other => s.push(other),
                    }
                }
                if !closed {
                    return Err(Error::syntax(line, "unterminated quoted string"));
                }
                tokens.push(Token {
                    text: s,
                    quoted: true,
                });
                line_start = false;
            }
            _ => {
                if tokens.is_empty() {
                    entry_line = line;
                }
                let mut s = String::from(c);
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        s.push(escaped);
                    }
                }
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || matches!(next, '(' | ')' | ';' | '"') {
                        break;
                    }
                    chars.next();
                    s.push(next);
                    if next == '\\' {
                        if let Some(escaped) = chars.next() {
                            s.push(escaped);
                        }
                    }
                }
                tokens.push(Token {
                    text: s,
                    quoted: false,
                });
                line_start = false;
            }
        }
    }

    if depth != 0 {
        return Err(Error::syntax(line, "unbalanced opening parenthesis"));
    }
    if !tokens.is_empty() {
        entries.push(Entry {
            line: entry_line,
            leading_blank,
            tokens,
        });
    }
    Ok(entries)
}

/// Parse a TTL, accepting plain seconds or BIND unit suffixes (`1h30m`, `2d`, `1w`).
///
/// # Errors
///
/// Returns [`Error::Syntax`] (with line 0) when `s` isn't a valid TTL.
pub fn parse_ttl(s: &str) -> Result<u32, Error> {
    let invalid = || Error::syntax(0, format!("invalid TTL \"{s}\""));
    if s.is_empty() || !s.as_bytes()[0].is_ascii_digit() {
        return Err(invalid());
    }
    if let Ok(n) = s.parse::<u32>() {
        return Ok(n);
    }
    let mut total: u64 = 0;
    let mut current: u64 = 0;
    let mut pending = false;
    for c in s.chars() {
        if let Some(d) = c.to_digit(10) {
            current = current
                .checked_mul(10)
                .and_then(|n| n.checked_add(u64::from(d)))
                .ok_or_else(invalid)?;
            pending = true;
            continue;
        }
        let unit = match c.to_ascii_lowercase() {
            's' => 1,
            'm' => 60,
            'h' => 3_600,
            'd' => 86_400,
            'w' => 604_800,
            _ => return Err(invalid()),
        };
        if !pending {
            return Err(invalid());
        }
        total = current
            .checked_mul(unit)
            .and_then(|n| n.checked_add(total))
            .ok_or_else(invalid)?;
        current = 0;
        pending = false;
    }
    let total = total.checked_add(current).ok_or_else(invalid)?;
    u32::try_from(total).map_err(|_| invalid())
}

fn class_of(token: &str) -> Option<Result<Class, Error>> {
    let upper = token.to_ascii_uppercase();
    match upper.as_str() {
        "IN" | "CLASS1" => Some(Ok(Class::IN)),
        "CH" | "CS" | "HS" | "NONE" | "ANY" => Some(Err(Error::UnsupportedClass(upper))),
        _ if upper.starts_with("CLASS") && upper[5..].parse::<u16>().is_ok() => {
            Some(Err(Error::UnsupportedClass(upper)))
        }
        _ => None,
    }
}

/// Decode the escapes of a character-string (`\X` and `\DDD`).
fn decode_string(raw: &str, line: usize) -> Result<Vec<u8>, Error> {
    let mut bytes = Vec::with_capacity(raw.len());
    let mut iter = raw.bytes().peekable();
    while let Some(b) = iter.next() {
        if b != b'\\' {
            bytes.push(b);
            continue;
        }
        let Some(next) = iter.next() else {
            return Err(Error::syntax(line, "dangling escape"));
        };
        if next.is_ascii_digit() {
            let d2 = iter.next().filter(u8::is_ascii_digit);
            let d3 = iter.next().filter(u8::is_ascii_digit);
            match (d2, d3) {
                (Some(d2), Some(d3)) => {
                    let value = u32::from(next - b'0') * 100
                        + u32::from(d2 - b'0') * 10
                        + u32::from(d3 - b'0');
                    let byte = u8::try_from(value)
                        .map_err(|_| Error::syntax(line, "escape value out of range"))?;
                    bytes.push(byte);
                }
                _ => return Err(Error::syntax(line, "invalid \\DDD escape")),
            }
        } else {
            bytes.push(next);
        }
    }
    Ok(bytes)
}

struct Fields<'a> {
    tokens: std::slice::Iter<'a, Token>,
    line: usize,
    origin: &'a str,
    rrtype: RrType,
}

impl<'a> Fields<'a> {
    fn next(&mut self, what: &str) -> Result<&'a Token, Error> {
        self.tokens
            .next()
            .ok_or_else(|| Error::syntax(self.line, format!("{} record: missing {what}", self.rrtype)))
    }

    fn text(&mut self, what: &str) -> Result<&'a str, Error> {
        Ok(&self.next(what)?.text)
    }

    fn number<T: std::str::FromStr>(&mut self, what: &str) -> Result<T, Error> {
        let line = self.line;
        let rrtype = self.rrtype;
        let text = self.text(what)?;
        text.parse()
            .map_err(|_| Error::syntax(line, format!("{rrtype} record: invalid {what} \"{text}\"")))
    }

    fn timer(&mut self, what: &str) -> Result<u32, Error> {
        let line = self.line;
        let text = self.text(what)?;
        parse_ttl(text).map_err(|_| Error::syntax(line, format!("invalid {what} \"{text}\"")))
    }

    fn name(&mut self, what: &str) -> Result<String, Error> {
        let origin = self.origin;
        Ok(absolute_name(self.text(what)?, origin))
    }

    /// A character-string that must hold UTF-8. Only TXT keeps raw octets.
    fn string(&mut self, what: &str) -> Result<String, Error> {
        let line = self.line;
        let rrtype = self.rrtype;
        String::from_utf8(decode_string(self.text(what)?, line)?)
            .map_err(|_| Error::syntax(line, format!("{rrtype} record: {what} is not UTF-8")))
    }

    /// Remaining tokens concatenated, as lowercase hex.
    fn hex_rest(&mut self, what: &str) -> Result<String, Error> {
        let joined: String = self.tokens.by_ref().map(|t| t.text.as_str()).collect();
        if joined.is_empty() || hex::decode(&joined).is_err() {
            return Err(Error::syntax(
                self.line,
                format!("{} record: invalid {what}", self.rrtype),
            ));
        }
        Ok(joined.to_ascii_lowercase())
    }

    fn done(mut self) -> Result<(), Error> {
        match self.tokens.next() {
            None => Ok(()),
            Some(extra) => Err(Error::syntax(
                self.line,
                format!("{} record: unexpected \"{}\"", self.rrtype, extra.text),
            )),
        }
    }
}

fn parse_rdata(rrtype: RrType, tokens: &[Token], origin: &str, line: usize) -> Result<RData, Error> {
    if let Some(first) = tokens.first() {
        if !first.quoted && first.text == "\\#" {
            return parse_generic(rrtype, &tokens[1..], line);
        }
    }

    let mut f = Fields {
        tokens: tokens.iter(),
        line,
        origin,
        rrtype,
    };
    let rdata = match rrtype {
        RrType::A => {
            let a: Ipv4Addr = f.number("address")?;
            RData::A { a }
        }
        RrType::AAAA => {
            let aaaa: Ipv6Addr = f.number("address")?;
            RData::AAAA { aaaa }
        }
        RrType::NS => RData::NS {
            ns: f.name("nameserver")?,
        },
        RrType::CNAME => RData::CNAME {
            target: f.name("target")?,
        },
        RrType::PTR => RData::PTR {
            ptr: f.name("target")?,
        },
        RrType::DNAME => RData::DNAME {
            target: f.name("target")?,
        },
        RrType::MX => RData::MX {
            preference: f.number("preference")?,
            mx: f.name("exchange")?,
        },
        RrType::SOA => RData::SOA {
            ns: f.name("primary nameserver")?,
            mbox: f.name("mailbox")?,
            serial: f.number("serial")?,
            refresh: f.timer("refresh")?,
            retry: f.timer("retry")?,
            expire: f.timer("expire")?,
            minttl: f.timer("minimum TTL")?,
        },
        RrType::TXT => {
            let segments = tokens
                .iter()
                .map(|t| decode_string(&t.text, line))
                .collect::<Result<Vec<_>, _>>()?;
            if segments.is_empty() {
                return Err(Error::syntax(line, "TXT record: missing text"));
            }
            return Ok(RData::TXT(Txt::from_segments(segments)));
        }
        RrType::SRV => RData::SRV {
            priority: f.number("priority")?,
            weight: f.number("weight")?,
            port: f.number("port")?,
            target: f.name("target")?,
        },
        RrType::CAA => RData::CAA {
            flag: f.number("flag")?,
            tag: f.text("tag")?.to_string(),
            value: f.string("value")?,
        },
        RrType::TLSA => RData::TLSA {
            usage: f.number("usage")?,
            selector: f.number("selector")?,
            matching_type: f.number("matching type")?,
            certificate: f.hex_rest("certificate data")?,
        },
        RrType::SSHFP => RData::SSHFP {
            algorithm: f.number("algorithm")?,
            fp_type: f.number("fingerprint type")?,
            fingerprint: f.hex_rest("fingerprint")?,
        },
        RrType::DS => RData::DS {
            key_tag: f.number("key tag")?,
            algorithm: f.number("algorithm")?,
            digest_type: f.number("digest type")?,
            digest: f.hex_rest("digest")?,
        },
        RrType::NAPTR => RData::NAPTR {
            order: f.number("order")?,
            preference: f.number("preference")?,
            flags: f.string("flags")?,
            service: f.string("service")?,
            regexp: f.string("regexp")?,
            replacement: f.name("replacement")?,
        },
        _ if rrtype.mnemonic().is_some() => {
            if tokens.is_empty() {
                return Err(Error::syntax(line, format!("{rrtype} record: missing data")));
            }
            let fields = tokens
                .iter()
                .map(|t| {
                    if t.quoted {
                        format!("\"{}\"", t.text)
                    } else {
                        t.text.clone()
                    }
                })
                .collect();
            return Ok(RData::Other { rrtype, fields });
        }
        _ => {
            return Err(Error::syntax(
                line,
                format!("{rrtype} record: unknown types require the \\# generic form"),
            ))
        }
    };
    f.done()?;
    Ok(rdata)
}

fn parse_generic(rrtype: RrType, tokens: &[Token], line: usize) -> Result<RData, Error> {
    let (len, rest) = tokens
        .split_first()
        .ok_or_else(|| Error::syntax(line, "generic rdata: missing length"))?;
    let len: usize = len
        .text
        .parse()
        .map_err(|_| Error::syntax(line, "generic rdata: invalid length"))?;
    let joined: String = rest.iter().map(|t| t.text.as_str()).collect();
    let data = hex::decode(&joined).map_err(|_| Error::syntax(line, "generic rdata: invalid hex"))?;
    if data.len() != len {
        return Err(Error::syntax(
            line,
            format!("generic rdata: length {len} does not match {} octets", data.len()),
        ));
    }
    Ok(RData::Unknown {
        rrtype: rrtype.0,
        data,
    })
}

/// Parse master-file `text` into records with absolute names. Relative names are qualified with
/// `origin` until a `$ORIGIN` directive changes it.
///
/// # Errors
///
/// Returns [`Error::Syntax`] for malformed text and [`Error::UnsupportedClass`] for records
/// outside the `IN` class.
pub fn parse_zone(text: &str, origin: &str) -> Result<Vec<Record>, Error> {
    let mut origin = super::name::fqdn(origin);
    let mut zone_ttl: Option<u32> = None;
    let mut last_owner: Option<String> = None;
    let mut last_ttl: Option<u32> = None;
    let mut records = Vec::new();

    for entry in scan(text)? {
        let line = entry.line;
        let tokens = &entry.tokens;
        let first = &tokens[0];

        if !first.quoted && first.text.starts_with('$') && !entry.leading_blank {
            let arg = tokens
                .get(1)
                .ok_or_else(|| Error::syntax(line, format!("{} needs an argument", first.text)))?;
            match first.text.to_ascii_uppercase().as_str() {
                "$ORIGIN" => origin = absolute_name(&arg.text, &origin),
                "$TTL" => {
                    zone_ttl = Some(
                        parse_ttl(&arg.text).map_err(|_| Error::syntax(line, "invalid $TTL"))?,
                    );
                }
                other => return Err(Error::syntax(line, format!("unsupported directive {other}"))),
            }
            continue;
        }

        let mut idx = 0;
        let owner = if entry.leading_blank {
            last_owner
                .clone()
                .ok_or_else(|| Error::syntax(line, "record without owner"))?
        } else {
            idx = 1;
            absolute_name(&first.text, &origin)
        };

        let mut ttl = None;
        let mut class_seen = false;
        while idx < tokens.len() && !tokens[idx].quoted {
            let text = &tokens[idx].text;
            if !class_seen {
                if let Some(class) = class_of(text) {
                    class?;
                    class_seen = true;
                    idx += 1;
                    continue;
                }
            }
            if ttl.is_none() {
                if let Ok(value) = parse_ttl(text) {
                    ttl = Some(value);
                    idx += 1;
                    continue;
                }
            }
            break;
        }

        let type_token = tokens
            .get(idx)
            .ok_or_else(|| Error::syntax(line, "missing record type"))?;
        let rrtype = RrType::from_mnemonic(&type_token.text)
            .filter(|_| !type_token.quoted)
            .ok_or_else(|| Error::syntax(line, format!("unknown record type \"{}\"", type_token.text)))?;
        let data = parse_rdata(rrtype, &tokens[idx + 1..], &origin, line)?;

        let ttl = ttl.or(zone_ttl).or(last_ttl).unwrap_or(DEFAULT_TTL);
        last_owner = Some(owner.clone());
        last_ttl = Some(ttl);
        records.push(Record {
            name: owner,
            class: Class::IN,
            ttl,
            data,
        });
    }

    Ok(records)
}

/// Parse exactly one record.
///
/// # Errors
///
/// Same as [`parse_zone`], plus [`Error::Syntax`] when `text` holds zero or several records.
pub fn parse_rr(text: &str, origin: &str) -> Result<Record, Error> {
    let mut records = parse_zone(text, origin)?;
    match records.len() {
        1 => Ok(records.remove(0)),
        n => Err(Error::syntax(1, format!("expected one record, found {n}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: &str = "example.com.";

    #[test]
    fn directives_and_inherited_owner() {
        let zone = "$ORIGIN example.com.\n$TTL 1h\n@ IN SOA ns1 hostmaster ( 1 ; serial\n 7200 3600 1209600 3600 )\n  IN NS ns1\nwww 300 A 192.0.2.1\n";
        let records = parse_zone(zone, "other.org.").unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].name, "example.com.");
        assert_eq!(records[0].ttl, 3600);
        assert_eq!(records[1].name, "example.com.");
        assert_eq!(records[1].data, RData::NS { ns: "ns1.example.com.".into() });
        assert_eq!(records[2].name, "www.example.com.");
        assert_eq!(records[2].ttl, 300);
    }

    #[test]
    fn class_defaults_to_in_and_may_follow_ttl() {
        let a = parse_rr("www 300 IN A 192.0.2.1", ORIGIN).unwrap();
        let b = parse_rr("www IN 300 A 192.0.2.1", ORIGIN).unwrap();
        let c = parse_rr("www 300 A 192.0.2.1", ORIGIN).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn other_classes_are_rejected() {
        let err = parse_rr("www 300 CH A 192.0.2.1", ORIGIN).unwrap_err();
        assert!(matches!(err, Error::UnsupportedClass(_)));
    }

    #[test]
    fn syntax_errors_carry_the_line() {
        let err = parse_zone("www 300 A 192.0.2.1\nbad 300 A not-an-ip\n", ORIGIN).unwrap_err();
        assert!(matches!(err, Error::Syntax { line: 2, .. }));
        assert!(parse_zone("www 300 A ( 192.0.2.1", ORIGIN).is_err());
        assert!(parse_zone("www 300 TXT \"open", ORIGIN).is_err());
        assert!(parse_zone("$INCLUDE other.zone", ORIGIN).is_err());
    }

    #[test]
    fn txt_keeps_segments_and_escapes() {
        let rr = parse_rr(r#"@ 300 TXT "v=spf1 " "-all" "say \"hi\"\059""#, ORIGIN).unwrap();
        match rr.data {
            RData::TXT(txt) => {
                let segments: Vec<&[u8]> = txt.segments().iter().map(Vec::as_slice).collect();
                assert_eq!(segments, vec![&b"v=spf1 "[..], &b"-all"[..], &b"say \"hi\";"[..]]);
                assert_eq!(txt.as_str(), Some("v=spf1 -allsay \"hi\";"));
            }
            other => panic!("unexpected rdata {other:?}"),
        }
    }

    #[test]
    fn generic_form_for_unknown_types() {
        let rr = parse_rr("@ 300 TYPE65280 \\# 3 abcdef", ORIGIN).unwrap();
        assert_eq!(
            rr.data,
            RData::Unknown {
                rrtype: 65280,
                data: vec![0xab, 0xcd, 0xef]
            }
        );
        assert!(parse_rr("@ 300 TYPE65280 \\# 4 abcdef", ORIGIN).is_err());
        assert!(parse_rr("@ 300 TYPE65280 abcdef", ORIGIN).is_err());
    }

    #[test]
    fn ttl_units() {
        assert_eq!(parse_ttl("3600").unwrap(), 3600);
        assert_eq!(parse_ttl("1h30m").unwrap(), 5400);
        assert_eq!(parse_ttl("1w").unwrap(), 604_800);
        assert!(parse_ttl("h").is_err());
        assert!(parse_ttl("A").is_err());
    }

    #[test]
    fn oversized_ttls_are_syntax_errors() {
        assert!(parse_ttl("4294967296").is_err());
        assert!(parse_ttl("99999999999999999999999").is_err());
        assert!(parse_ttl("99999999999999999999w").is_err());
        assert!(parse_ttl("4294967295s1s").is_err());
        assert_eq!(parse_ttl("4294967295").unwrap(), u32::MAX);
        let err = parse_zone("www 99999999999999999999999 A 192.0.2.1", ORIGIN).unwrap_err();
        assert!(matches!(err, Error::Syntax { line: 1, .. }));
    }

    #[test]
    fn dnssec_types_are_kept_verbatim() {
        let rr = parse_rr(
            "@ 300 DNSKEY 257 3 13 mdsswUyr3DPW132mOi8V9xESWE8jTo0d xCjjnopKl+GqJxpVXckHAeF+KkxLbxIL fDLUT0rAK9iUzy1L53eKGQ==",
            ORIGIN,
        )
        .unwrap();
        assert!(rr.rr_type().is_dnssec());
        match &rr.data {
            RData::Other { fields, .. } => assert_eq!(fields.len(), 6),
            other => panic!("unexpected rdata {other:?}"),
        }
    }
}

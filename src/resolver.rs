//! One-shot DNS queries against a chosen resolver, for checking what is actually published.

use crate::error::Error;
use crate::rr::{parse_rr, RData, Record, RrType};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use tokio::net::UdpSocket;
use trust_dns_client::client::{AsyncClient, ClientHandle};
use trust_dns_client::op::ResponseCode;
use trust_dns_client::rr::{DNSClass, Name, RecordType};
use trust_dns_client::udp::UdpClientStream;
use trust_dns_proto::serialize::binary::{BinEncodable, BinEncoder};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A query as the API receives it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResolverQuery {
    /// Address of the resolver, with an optional port.
    pub resolver: String,
    pub domain: String,
    #[serde(rename = "type")]
    pub rrtype: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolverAnswer {
    pub rcode: String,
    pub answers: Vec<String>,
    pub authority: Vec<String>,
}

impl ResolverQuery {
    fn server(&self) -> Result<SocketAddr, Error> {
        if let Ok(addr) = SocketAddr::from_str(&self.resolver) {
            return Ok(addr);
        }
        IpAddr::from_str(self.resolver.trim_matches(|c| c == '[' || c == ']'))
            .map(|ip| SocketAddr::new(ip, 53))
            .map_err(|_| Error::Validation(format!("invalid resolver address {:?}", self.resolver)))
    }

    fn record_type(&self) -> Result<RecordType, Error> {
        RrType::from_mnemonic(&self.rrtype)
            .map(|t| RecordType::from(t.0))
            .ok_or_else(|| Error::Validation(format!("unknown record type {:?}", self.rrtype)))
    }
}

/// Re-encode an answer without name compression and decode it with our own codec, so
/// unknown types and odd TXT bytes come out exactly as the zone parser would read them.
fn decode_answer(rr: &trust_dns_client::rr::Record) -> Result<Record, Error> {
    let mut buf = Vec::new();
    let mut encoder = BinEncoder::new(&mut buf);
    encoder.set_canonical_names(true);
    rr.emit(&mut encoder)?;
    let (record, used) = Record::from_wire(&buf)?;
    if used != buf.len() {
        return Err(Error::Validation(format!("{} trailing octets after answer", buf.len() - used)));
    }
    // Named types without a structured form read better from their text.
    if matches!(record.data, RData::Unknown { .. }) && record.rr_type().mnemonic().is_some() {
        return Err(Error::Unsupported("wire decoding of this type"));
    }
    Ok(record)
}

fn convert(records: &[trust_dns_client::rr::Record]) -> Vec<String> {
    records
        .iter()
        .map(|rr| match decode_answer(rr) {
            Ok(record) => record.to_string(),
            Err(err) => {
                tracing::debug!(%err, "answer not decodable, falling back to text");
                let text = rr.to_string();
                parse_rr(&text, ".").map_or(text, |parsed: Record| parsed.to_string())
            }
        })
        .collect()
}

/// Send `query` over UDP and wait at most `timeout` for the answer.
///
/// # Errors
///
/// Returns [`Error::Validation`] for a malformed query and [`Error::Resolver`] when the
/// resolver can't be reached, times out, or answers with anything but NOERROR.
pub async fn resolve(query: &ResolverQuery, timeout: Duration) -> Result<ResolverAnswer, Error> {
    let server = query.server()?;
    let rrtype = query.record_type()?;
    let name = Name::from_str(&query.domain)
        .map_err(|err| Error::Validation(format!("invalid domain {:?}: {err}", query.domain)))?;

    let stream = UdpClientStream::<UdpSocket>::with_timeout(server, timeout);
    let (mut client, background) = AsyncClient::connect(stream)
        .await
        .map_err(|err| Error::Resolver(err.to_string()))?;
    let background = tokio::spawn(background);

    let response = tokio::time::timeout(timeout, client.query(name, DNSClass::IN, rrtype)).await;
    background.abort();
    let response = response
        .map_err(|_| Error::Resolver(format!("no answer from {server} within {timeout:?}")))?
        .map_err(|err| Error::Resolver(err.to_string()))?;

    let rcode = response.response_code();
    if rcode != ResponseCode::NoError {
        return Err(Error::Resolver(format!("{server} answered {rcode}")));
    }
    tracing::debug!(%server, domain = %query.domain, answers = response.answers().len(), "resolved");
    Ok(ResolverAnswer {
        rcode: rcode.to_string(),
        answers: convert(response.answers()),
        authority: convert(response.name_servers()),
    })
}

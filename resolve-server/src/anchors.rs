//! Trust anchor loading (spec §6: *trust-anchor-file*, *trust-anchor*,
//! *auto-trust-anchor-file*, *trusted-keys-file*).
//!
//! Each of the four configuration surfaces ultimately names one or more
//! presentation-format RR lines; this module turns those lines into
//! [`TrustAnchor`]s. `trust-anchor`/`trust-anchor-file` carry DS records,
//! `auto-trust-anchor-file`/`trusted-keys-file` carry DNSKEY records
//! (RFC 5011 managed-key files use the same DNSKEY presentation format).

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use hickory_proto::dnssec::rdata::{DNSKEY, DS};
use hickory_proto::dnssec::{Algorithm, DigestType, PublicKeyBuf};
use hickory_proto::rr::Name;
use resolve_config::TrustAnchorConfig;
use resolve_proto::TrustAnchor;

/// One presentation-format line, split into whitespace-separated tokens
/// with a trailing `;`-comment stripped.
fn tokens(line: &str) -> Vec<&str> {
    let line = line.split(';').next().unwrap_or("");
    line.split_whitespace().collect()
}

fn parse_ds_line(line: &str) -> Result<Option<(Name, DS)>> {
    let tokens = tokens(line);
    if tokens.is_empty() {
        return Ok(None);
    }
    // `name [CLASS] IN DS key-tag algorithm digest-type digest...`
    let name_pos = tokens.iter().position(|t| t.eq_ignore_ascii_case("DS")).context("missing DS token")?;
    if name_pos < 2 {
        bail!("malformed trust-anchor line: {line:?}");
    }
    let name = Name::from_str(tokens[0]).with_context(|| format!("invalid owner name in {line:?}"))?;
    let rest = &tokens[name_pos + 1..];
    if rest.len() < 4 {
        bail!("malformed DS rdata in {line:?}");
    }
    let key_tag: u16 = rest[0].parse().with_context(|| format!("invalid key tag in {line:?}"))?;
    let algorithm = Algorithm::from_u8(rest[1].parse().with_context(|| format!("invalid algorithm in {line:?}"))?);
    let digest_type = DigestType::from(rest[2].parse::<u8>().with_context(|| format!("invalid digest type in {line:?}"))?);
    let digest = hex::decode(rest[3..].concat()).with_context(|| format!("invalid digest hex in {line:?}"))?;
    Ok(Some((name, DS::new(key_tag, algorithm, digest_type, digest))))
}

fn parse_dnskey_line(line: &str) -> Result<Option<(Name, DNSKEY)>> {
    let tokens = tokens(line);
    if tokens.is_empty() {
        return Ok(None);
    }
    let name_pos = tokens.iter().position(|t| t.eq_ignore_ascii_case("DNSKEY")).context("missing DNSKEY token")?;
    if name_pos < 2 {
        bail!("malformed trusted-key line: {line:?}");
    }
    let name = Name::from_str(tokens[0]).with_context(|| format!("invalid owner name in {line:?}"))?;
    let rest = &tokens[name_pos + 1..];
    if rest.len() < 4 {
        bail!("malformed DNSKEY rdata in {line:?}");
    }
    let flags: u16 = rest[0].parse().with_context(|| format!("invalid flags in {line:?}"))?;
    let algorithm = Algorithm::from_u8(rest[2].parse().with_context(|| format!("invalid algorithm in {line:?}"))?);
    let key_bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, rest[3..].concat())
        .with_context(|| format!("invalid base64 key in {line:?}"))?;
    let key = DNSKEY::with_flags(flags, PublicKeyBuf::new(key_bytes, algorithm));
    Ok(Some((name, key)))
}

fn lines_from(literal: &[String], files: &[String]) -> Result<Vec<String>> {
    let mut out: Vec<String> = literal.to_vec();
    for path in files {
        let text = fs::read_to_string(Path::new(path)).with_context(|| format!("reading trust anchor file {path}"))?;
        out.extend(text.lines().map(str::to_owned));
    }
    Ok(out)
}

/// Build the process's trust anchor set from every configured surface,
/// folding DS and DNSKEY entries for the same owner name into one
/// [`TrustAnchor`] each (spec §3: "(name, set of DS and/or DNSKEY rdata)").
pub fn load(config: &TrustAnchorConfig) -> Result<Vec<TrustAnchor>> {
    let mut ds_by_name: HashMap<Name, Vec<DS>> = HashMap::new();
    let mut key_by_name: HashMap<Name, Vec<DNSKEY>> = HashMap::new();

    for line in lines_from(&config.trust_anchor, &config.trust_anchor_file)? {
        if let Some((name, ds)) = parse_ds_line(&line)? {
            ds_by_name.entry(name).or_default().push(ds);
        }
    }
    for line in lines_from(&[], &config.auto_trust_anchor_file)? {
        if let Some((name, key)) = parse_dnskey_line(&line)? {
            key_by_name.entry(name).or_default().push(key);
        }
    }
    for line in lines_from(&[], &config.trusted_keys_file)? {
        if let Some((name, key)) = parse_dnskey_line(&line)? {
            key_by_name.entry(name).or_default().push(key);
        }
    }

    let mut names: Vec<Name> = ds_by_name.keys().chain(key_by_name.keys()).cloned().collect();
    names.sort();
    names.dedup();

    Ok(names
        .into_iter()
        .map(|name| TrustAnchor {
            ds: ds_by_name.remove(&name).unwrap_or_default(),
            dnskey: key_by_name.remove(&name).unwrap_or_default(),
            name,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_ds_line() {
        let (name, ds) = parse_ds_line("example.test. IN DS 12345 8 2 AABBCCDDEEFF00112233445566778899AABBCCDDEEFF0011223344556677").unwrap().unwrap();
        assert_eq!(name, Name::from_str("example.test.").unwrap());
        assert_eq!(ds.key_tag(), 12345);
    }

    #[test]
    fn ds_and_dnskey_for_same_name_merge_into_one_anchor() {
        let config = TrustAnchorConfig {
            trust_anchor: vec!["example.test. IN DS 12345 8 2 AABBCCDDEEFF00112233445566778899AABBCCDDEEFF0011223344556677".into()],
            trusted_keys_file: vec![],
            ..Default::default()
        };
        let anchors = load(&config).unwrap();
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].ds.len(), 1);
    }

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        assert!(parse_ds_line("").unwrap().is_none());
        assert!(parse_ds_line("; a comment").unwrap().is_none());
    }
}

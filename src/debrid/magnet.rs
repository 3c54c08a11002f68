use std::fmt::Display;
use std::str::FromStr;

use anyhow::Context;
use reqwest::Url;

/// A parsed `magnet:` URI, reduced to what the resolver needs: the info hash
/// and display name. Providers register the raw URI string directly, so
/// trackers are not retained.
#[derive(Debug, Clone)]
pub struct MagnetLink {
    pub name: Option<String>,
    pub info_hash: String,
}

impl Display for MagnetLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut url = Url::parse(&format!("magnet:?xt=urn:btih:{}", self.info_hash)).unwrap();
        if let Some(name) = &self.name {
            url.query_pairs_mut().append_pair("dn", name);
        }
        write!(f, "{url}")
    }
}

impl FromStr for MagnetLink {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = Url::from_str(s)?;
        anyhow::ensure!(url.scheme() == "magnet", "not a magnet uri");
        let mut info_hash = None;
        let mut name = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" => {
                    let mut split = value.splitn(3, ':');
                    let urn = split.next().context("urn string is not found in xt")?;
                    let hash_indicator = split.next().context("hash indicator is not found in xt")?;
                    anyhow::ensure!(urn == "urn");
                    anyhow::ensure!(hash_indicator == "btih");
                    let hash = split.next().context("hash is not found in xt")?;
                    anyhow::ensure!(hash.len() == 40 || hash.len() == 32);
                    info_hash = Some(hash.to_ascii_uppercase());
                }
                "dn" => {
                    name = Some(value.to_string());
                }
                _ => {}
            }
        }
        Ok(Self {
            info_hash: info_hash.context("magnet link does not contain info_hash")?,
            name,
        })
    }
}

/// Extracts the info hash from either a magnet URI or a bare hash string (the
/// 40-char hex or 32-char base32 form), as accepted by
/// [`crate::debrid::types::ReleaseCandidate::info_hash`].
pub fn extract_info_hash(candidate_link_or_hash: &str) -> Option<String> {
    if candidate_link_or_hash.starts_with("magnet:") {
        return MagnetLink::from_str(candidate_link_or_hash)
            .ok()
            .map(|m| m.info_hash);
    }
    let trimmed = candidate_link_or_hash.trim();
    if trimmed.len() == 40 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return Some(trimmed.to_ascii_uppercase());
    }
    if trimmed.len() == 32 && trimmed.chars().all(is_base32_char) {
        return Some(trimmed.to_ascii_uppercase());
    }
    None
}

/// RFC 4648 base32 alphabet: `A`-`Z` and `2`-`7`.
fn is_base32_char(c: char) -> bool {
    let upper = c.to_ascii_uppercase();
    upper.is_ascii_uppercase() || ('2'..='7').contains(&upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_magnet_link() {
        let contents = "magnet:?xt=urn:btih:BE2D7CD9F6B0FDFC035EDFEE4EBD567003EBC254&dn=Rick.and.Morty.S07E01.1080p.WEB.H264-NHTFS%5BTGx%5D";
        let magnet = MagnetLink::from_str(contents).unwrap();
        assert_eq!(magnet.info_hash, "BE2D7CD9F6B0FDFC035EDFEE4EBD567003EBC254");
        assert_eq!(magnet.name.unwrap(), "Rick.and.Morty.S07E01.1080p.WEB.H264-NHTFS[TGx]");
    }

    #[test]
    fn rejects_non_magnet_scheme() {
        assert!(MagnetLink::from_str("https://example.com/a.torrent").is_err());
    }

    #[test]
    fn extract_info_hash_from_bare_hash_or_magnet() {
        assert_eq!(
            extract_info_hash("be2d7cd9f6b0fdfc035edfee4ebd567003ebc254"),
            Some("BE2D7CD9F6B0FDFC035EDFEE4EBD567003EBC254".to_string())
        );
        assert_eq!(
            extract_info_hash("magnet:?xt=urn:btih:BE2D7CD9F6B0FDFC035EDFEE4EBD567003EBC254"),
            Some("BE2D7CD9F6B0FDFC035EDFEE4EBD567003EBC254".to_string())
        );
        assert_eq!(extract_info_hash("not a hash"), None);
    }

    #[test]
    fn extract_info_hash_accepts_base32() {
        assert_eq!(
            extract_info_hash("abcdefghijklmnopqrstuvwx234567ab"),
            Some("ABCDEFGHIJKLMNOPQRSTUVWX234567AB".to_string())
        );
        // 32 chars but contains a digit outside the base32 alphabet (1, 0, 8, 9).
        assert_eq!(extract_info_hash("abcdefghijklmnopqrstuvwx2345671b"), None);
    }
}

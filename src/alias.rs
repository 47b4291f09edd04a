//! Human-readable names for tags.
//!
//! Aliases are given on the command line as `MAC=NAME` and only affect
//! output; the tag table is always keyed by address.

use crate::mac_address::MacAddress;
use std::collections::BTreeMap;

/// Address to name lookup.
pub type AliasMap = BTreeMap<MacAddress, String>;

/// A parsed alias mapping a MAC address to a human-readable name.
#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    pub address: MacAddress,
    pub name: String,
}

/// Parse an alias from a string in the format "MAC=NAME".
///
/// # Example
/// ```
/// use mijia_listener::alias::parse_alias;
///
/// let alias = parse_alias("4c:65:a8:d0:1e:0f=Bedroom").unwrap();
/// assert_eq!(alias.address.to_string(), "4C:65:A8:D0:1E:0F");
/// assert_eq!(alias.name, "Bedroom");
/// ```
pub fn parse_alias(src: &str) -> Result<Alias, String> {
    let (address, name) = src
        .split_once('=')
        .ok_or_else(|| "invalid alias: expected format MAC=NAME".to_string())?;
    let address = address
        .parse::<MacAddress>()
        .map_err(|e| format!("invalid alias '{src}': {e}"))?;
    if name.is_empty() {
        return Err(format!("invalid alias '{src}': empty name"));
    }
    Ok(Alias {
        address,
        name: name.to_string(),
    })
}

/// Collect aliases into a lookup map; later duplicates win.
pub fn to_map(aliases: &[Alias]) -> AliasMap {
    aliases
        .iter()
        .map(|a| (a.address, a.name.clone()))
        .collect()
}

/// Alias of `address`, or the address itself.
pub fn resolve_name(address: &MacAddress, aliases: &AliasMap) -> String {
    aliases
        .get(address)
        .cloned()
        .unwrap_or_else(|| address.to_string())
}

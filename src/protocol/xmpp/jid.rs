//! Helpers for `local@domain/resource` addresses.

/// The address without its resource part.
pub fn bare(jid: &str) -> &str {
    jid.split_once('/').map_or(jid, |(bare, _)| bare)
}

/// The resource part, if any.
pub fn resource(jid: &str) -> Option<&str> {
    jid.split_once('/').map(|(_, resource)| resource)
}

/// The local part of the bare address, if any.
pub fn localpart(jid: &str) -> Option<&str> {
    bare(jid).split_once('@').map(|(local, _)| local)
}

/// The domain part of the address.
pub fn domain(jid: &str) -> &str {
    let bare = bare(jid);
    bare.split_once('@').map_or(bare, |(_, domain)| domain)
}

/// Whether two addresses share the same bare part.
///
/// Local and domain parts are case-insensitive, so they are compared lowercased.
pub fn same_bare(a: &str, b: &str) -> bool {
    bare(a).to_lowercase() == bare(b).to_lowercase()
}

/// Nickname of a room occupant (`room@service/nick`).
///
/// An address without a resource is returned whole.
pub fn occupant_nick(jid: &str) -> &str {
    resource(jid).unwrap_or(jid)
}

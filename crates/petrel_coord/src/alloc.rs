//! Virtual-channel name synthesis.
//!
//! The wire form `<pchannel>_<collectionID>v<index>` is consumed by external
//! components and must stay bit-exact; `stats::parse_vchannel` is its
//! inverse.

use petrel_common::types::CollectionId;

/// A request for `num` vchannels of one collection.
#[derive(Debug, Clone, Copy)]
pub struct AllocVChannelRequest {
    pub collection_id: CollectionId,
    pub num: usize,
}

/// The vchannel name for slot `index` of `collection_id` on `pchannel`.
pub fn vchannel_name(pchannel: &str, collection_id: CollectionId, index: usize) -> String {
    format!("{}_{}v{}", pchannel, collection_id.0, index)
}

/// Synthesize one vchannel per pchannel, slots numbered from zero in the
/// order given. Callers pass the load-ordered eligible list already cut to
/// the requested size.
pub(crate) fn vchannel_names(pchannels: &[String], collection_id: CollectionId) -> Vec<String> {
    pchannels
        .iter()
        .enumerate()
        .map(|(index, pchannel)| vchannel_name(pchannel, collection_id, index))
        .collect()
}

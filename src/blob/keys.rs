//! Deterministic blob key layout
//!
//! `{md5(catalog)[0:2]}/{encCatalog}/{h1}/{h2}/{h3}/{filename}` where
//! `h1h2h3` is the low 24 bits of the (stop) timestamp in hex. The md5 shard
//! spreads catalogs; the timestamp levels bound per-directory fan-out.

use crate::encoding::{encode_component, md5_hex};
use crate::merge::MergeType;
use crate::tsseq::TsSeq;

fn catalog_prefix(catalog: &str) -> String {
    let hash = md5_hex(catalog);
    format!("{}/{}", &hash[..2], encode_component(catalog))
}

fn time_dirs(ts: i64) -> String {
    let low = (ts as u64) & 0x00FF_FFFF;
    let hex = format!("{:06x}", low);
    format!("{}/{}/{}", &hex[0..2], &hex[2..4], &hex[4..6])
}

/// Every blob of a catalog lives under this prefix
pub fn catalog_key_prefix(catalog: &str) -> String {
    format!("{}/", catalog_prefix(catalog))
}

pub fn delta_key(catalog: &str, ts_seq: TsSeq, merge_type: MergeType) -> String {
    format!(
        "{}/{}/{}_{}.dat",
        catalog_prefix(catalog),
        time_dirs(ts_seq.timestamp()),
        ts_seq,
        merge_type.code()
    )
}

pub fn snap_key(catalog: &str, start: TsSeq, stop: TsSeq) -> String {
    format!(
        "{}/{}/{}~{}.snap",
        catalog_prefix(catalog),
        time_dirs(stop.timestamp()),
        start,
        stop
    )
}

pub fn file_key(catalog: &str, path: &str) -> String {
    format!(
        "{}/files/{}.file",
        catalog_prefix(catalog),
        encode_component(path)
    )
}

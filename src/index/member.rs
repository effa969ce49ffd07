//! Index member grammar
//!
//! ```text
//! delta|{mt}|{encPath}|{tsSeq}             committed delta
//! pending|delta|{encPath}|{tsSeq}|{mt}     allocated, not yet committed
//! snap|{start}|{stop}                      snapshot covering (start, stop]
//! ```
//!
//! `|` is reserved: encoded paths never contain it.

use crate::encoding::{decode_component, encode_path};
use crate::error::IndexError;
use crate::merge::{FieldPath, MergeType};
use crate::tsseq::TsSeq;
use bytes::Bytes;
use std::fmt;

pub const DELTA_TAG: &str = "delta";
pub const PENDING_TAG: &str = "pending";
pub const SNAP_TAG: &str = "snap";

/// A committed delta as listed from the index
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaInfo {
    pub path: FieldPath,
    pub merge_type: MergeType,
    pub ts_seq: TsSeq,
    /// Body already in hand (e.g. just written); fetched from the blob store otherwise
    pub body: Option<Bytes>,
}

impl DeltaInfo {
    pub fn member(&self) -> String {
        delta_member(self.merge_type, &self.path, self.ts_seq)
    }
}

/// An allocated delta whose commit has not been observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInfo {
    pub path: String,
    pub merge_type: MergeType,
    pub ts_seq: TsSeq,
    pub member: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapInfo {
    pub start: TsSeq,
    pub stop: TsSeq,
}

impl SnapInfo {
    pub fn member(&self) -> String {
        snap_member(self.start, self.stop)
    }
}

impl fmt::Display for SnapInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}~{}", self.start, self.stop)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    Delta(DeltaInfo),
    Pending(PendingInfo),
    Snap(SnapInfo),
}

pub fn delta_member(merge_type: MergeType, path: &FieldPath, ts_seq: TsSeq) -> String {
    format!(
        "{}|{}|{}|{}",
        DELTA_TAG,
        merge_type.code(),
        encode_path(path.as_str()),
        ts_seq
    )
}

/// `enc_path` is already encoded; the allocator script receives it that way
pub fn pending_member(enc_path: &str, ts_seq: TsSeq, merge_type: MergeType) -> String {
    format!(
        "{}|{}|{}|{}|{}",
        PENDING_TAG,
        DELTA_TAG,
        enc_path,
        ts_seq,
        merge_type.code()
    )
}

pub fn snap_member(start: TsSeq, stop: TsSeq) -> String {
    format!("{}|{}|{}", SNAP_TAG, start, stop)
}

fn protocol(member: &str) -> IndexError {
    IndexError::Protocol(format!("undecodable member {:?}", member))
}

fn decode_path(enc: &str, member: &str) -> Result<String, IndexError> {
    decode_component(enc).ok_or_else(|| protocol(member))
}

fn merge_code(s: &str, member: &str) -> Result<MergeType, IndexError> {
    let code: i64 = s.parse().map_err(|_| protocol(member))?;
    MergeType::from_code(code).map_err(|_| protocol(member))
}

fn ts_seq(s: &str, member: &str) -> Result<TsSeq, IndexError> {
    TsSeq::parse(s).map_err(|_| protocol(member))
}

impl Member {
    pub fn parse(member: &str) -> Result<Member, IndexError> {
        let parts: Vec<&str> = member.split('|').collect();
        match parts.as_slice() {
            [DELTA_TAG, mt, enc_path, ts] => {
                let raw = decode_path(enc_path, member)?;
                let path = FieldPath::parse(&raw).map_err(|_| protocol(member))?;
                Ok(Member::Delta(DeltaInfo {
                    path,
                    merge_type: merge_code(mt, member)?,
                    ts_seq: ts_seq(ts, member)?,
                    body: None,
                }))
            }
            [PENDING_TAG, DELTA_TAG, enc_path, ts, mt] => Ok(Member::Pending(PendingInfo {
                path: decode_path(enc_path, member)?,
                merge_type: merge_code(mt, member)?,
                ts_seq: ts_seq(ts, member)?,
                member: member.to_string(),
            })),
            [SNAP_TAG, start, stop] => Ok(Member::Snap(SnapInfo {
                start: ts_seq(start, member)?,
                stop: ts_seq(stop, member)?,
            })),
            _ => Err(protocol(member)),
        }
    }

    pub fn ts_seq(&self) -> TsSeq {
        match self {
            Member::Delta(d) => d.ts_seq,
            Member::Pending(p) => p.ts_seq,
            Member::Snap(s) => s.stop,
        }
    }
}

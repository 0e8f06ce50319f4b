//! Typed `CLUSTER INFO`.

use std::collections::HashMap;
use std::str::FromStr;

use thiserror::Error;

use crate::slots::TOTAL_SLOTS;

/// A server reply that does not have the expected fields.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown cluster_state `{0}`")]
    UnknownState(String),

    #[error("field {key} is not a number: {value}")]
    InvalidValue { key: String, value: String },

    #[error("reply has no {0} field")]
    MissingField(String),
}

/// `cluster_state` as a node reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    Ok,
    Fail,
}

impl FromStr for ClusterState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = s.trim();
        if state.eq_ignore_ascii_case("ok") {
            Ok(Self::Ok)
        } else if state.eq_ignore_ascii_case("fail") {
            Ok(Self::Fail)
        } else {
            Err(ParseError::UnknownState(state.to_string()))
        }
    }
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::Fail => "fail",
        })
    }
}

/// One node's `CLUSTER INFO` summary.
#[derive(Debug, Clone)]
pub struct ClusterInfo {
    pub state: ClusterState,
    pub slots_assigned: u32,
    pub slots_ok: u32,
    pub slots_pfail: u32,
    pub slots_fail: u32,
    /// Members this node knows about, itself included.
    pub known_nodes: u32,
    /// Masters serving at least one slot.
    pub cluster_size: u32,
    pub current_epoch: u64,
    /// Every field of the reply, including the ones not lifted above.
    pub raw: HashMap<String, String>,
}

impl ClusterInfo {
    /// Parse a `CLUSTER INFO` reply.
    ///
    /// The slot counters, `cluster_known_nodes` and `cluster_size` are
    /// required; `cluster_current_epoch` defaults to 0.
    pub fn parse(info: &str) -> Result<Self, ParseError> {
        let raw = super::parsing::parse_info_output(info);
        let reader = FieldReader { raw: &raw };

        Ok(Self {
            state: reader.text("cluster_state")?.parse()?,
            slots_assigned: reader.count("cluster_slots_assigned")?,
            slots_ok: reader.count("cluster_slots_ok")?,
            slots_pfail: reader.count("cluster_slots_pfail")?,
            slots_fail: reader.count("cluster_slots_fail")?,
            known_nodes: reader.count("cluster_known_nodes")?,
            cluster_size: reader.count("cluster_size")?,
            current_epoch: reader.number("cluster_current_epoch").unwrap_or(0),
            raw,
        })
    }

    pub fn all_slots_assigned(&self) -> bool {
        self.slots_assigned == u32::from(TOTAL_SLOTS)
    }

    /// `ok`, every slot assigned and none failing.
    pub fn is_healthy(&self) -> bool {
        self.state == ClusterState::Ok
            && self.all_slots_assigned()
            && self.slots_fail == 0
            && self.slots_pfail == 0
    }
}

struct FieldReader<'a> {
    raw: &'a HashMap<String, String>,
}

impl FieldReader<'_> {
    fn text(&self, key: &str) -> Result<&str, ParseError> {
        self.raw
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ParseError::MissingField(key.to_string()))
    }

    fn number(&self, key: &str) -> Result<u64, ParseError> {
        let value = self.text(key)?;
        value.trim().parse().map_err(|_| ParseError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    fn count(&self, key: &str) -> Result<u32, ParseError> {
        let value = self.number(key)?;
        u32::try_from(value).map_err(|_| ParseError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

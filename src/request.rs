use std::{collections::HashSet, str::FromStr};

use serde::Deserialize;

use crate::error::TraceError;

const NUM_FIELDS: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    Get,
    Set,
    Del,
    Add,
    Incr,
    Stats,
    Other,
}

impl From<u32> for OpType {
    fn from(code: u32) -> Self {
        match code {
            1 => OpType::Get,
            2 => OpType::Set,
            3 => OpType::Del,
            4 => OpType::Add,
            5 => OpType::Incr,
            6 => OpType::Stats,
            _ => OpType::Other,
        }
    }
}

/// One line of a trace: `time,app_id,type,key_size,value_size,key_id,hit`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Request {
    pub time: f64,
    pub app_id: u32,
    pub op: OpType,
    pub key_size: u32,
    pub value_size: u32,
    pub key: u64,
    pub hit: bool,
}

impl Request {
    /// Bytes the object occupies once cached.
    pub fn size(&self) -> u64 {
        self.key_size as u64 + self.value_size as u64
    }

    pub fn parse(line: &str, line_no: usize) -> Result<Request, TraceError> {
        let fields = line.split(',').map(str::trim).collect::<Vec<_>>();
        if fields.len() < NUM_FIELDS {
            return Err(TraceError::Parse {
                line: line_no,
                reason: format!("expected {NUM_FIELDS} fields, found {}", fields.len()),
            });
        }

        Ok(Request {
            time: field(&fields, 0, "time", line_no)?,
            app_id: field(&fields, 1, "app id", line_no)?,
            op: OpType::from(field::<u32>(&fields, 2, "type", line_no)?),
            key_size: field(&fields, 3, "key size", line_no)?,
            value_size: field(&fields, 4, "value size", line_no)?,
            key: field(&fields, 5, "key id", line_no)?,
            hit: field::<u8>(&fields, 6, "hit", line_no)? != 0,
        })
    }
}

fn field<T: FromStr>(
    fields: &[&str],
    idx: usize,
    name: &str,
    line_no: usize,
) -> Result<T, TraceError> {
    fields[idx].parse().map_err(|_| TraceError::Parse {
        line: line_no,
        reason: format!("bad {name} '{}'", fields[idx]),
    })
}

/// Decides which trace requests take part in the simulation at all.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Filter {
    pub apps: Option<HashSet<u32>>,
}

impl Filter {
    pub fn admits(&self, req: &Request) -> bool {
        req.op == OpType::Get
            && req.value_size > 0
            && self
                .apps
                .as_ref()
                .map_or(true, |apps| apps.contains(&req.app_id))
    }
}

#[cfg(test)]
pub(crate) fn get(key: u64, size: u32) -> Request {
    Request {
        time: 0.0,
        app_id: 1,
        op: OpType::Get,
        key_size: 0,
        value_size: size,
        key,
        hit: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_line() {
        let req = Request::parse("86401.5,19,1,24,1000,42,1", 3).unwrap();
        assert_eq!(req.time, 86401.5);
        assert_eq!(req.app_id, 19);
        assert_eq!(req.op, OpType::Get);
        assert_eq!(req.key, 42);
        assert_eq!(req.size(), 1024);
        assert!(req.hit);
    }

    #[test]
    fn unknown_type_is_other() {
        let req = Request::parse("0,1,99,1,1,1,0", 1).unwrap();
        assert_eq!(req.op, OpType::Other);
    }

    #[test]
    fn malformed_line_reports_line_number() {
        match Request::parse("0,1,1,abc,1,1,0", 17) {
            Err(TraceError::Parse { line, .. }) => assert_eq!(line, 17),
            other => panic!("unexpected {other:?}"),
        }
        match Request::parse("0,1,1", 4) {
            Err(TraceError::Parse { line, .. }) => assert_eq!(line, 4),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn filter_rejects_ineligible_requests() {
        let filter = Filter {
            apps: Some(HashSet::from([1])),
        };
        assert!(filter.admits(&get(1, 10)));

        let mut set = get(1, 10);
        set.op = OpType::Set;
        assert!(!filter.admits(&set));

        assert!(!filter.admits(&get(1, 0)));

        let mut other_app = get(1, 10);
        other_app.app_id = 2;
        assert!(!filter.admits(&other_app));
        assert!(Filter::default().admits(&other_app));
    }
}

//! Application directory.
//!
//! Table services identifies its callers by [`AppId`]. Applications register a
//! name once and receive an id; qualified table names are formed as
//! `"{AppName}.{TableName}"`.

use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{BadArgumentSnafu, Result};

/// Identifier of a cooperating application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(u32);

impl AppId {
    /// Table services itself. Calls made with this id run in the
    /// table-services context and may act on any table.
    pub const TABLE_SERVICES: AppId = AppId(0);

    /// Returns the raw value.
    pub const fn value(self) -> u32 {
        self.0
    }

    pub(crate) const fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "app:{}", self.0)
    }
}

/// Name under which table services registers itself.
pub const TABLE_SERVICES_APP_NAME: &str = "TBL";

/// Name-to-id directory of registered applications.
#[derive(Debug)]
pub(crate) struct AppDirectory {
    names: RwLock<Vec<String>>,
    max_name_len: usize,
}

impl AppDirectory {
    pub(crate) fn new(max_name_len: usize) -> Self {
        Self { names: RwLock::new(vec![TABLE_SERVICES_APP_NAME.to_string()]), max_name_len }
    }

    /// Registers `name`, returning the existing id if it is already known.
    pub(crate) fn register(&self, name: &str) -> Result<AppId> {
        if name.is_empty() || name.len() > self.max_name_len || name.contains('.') {
            return BadArgumentSnafu { message: format!("invalid application name {name:?}") }.fail();
        }
        let mut names = self.names.write();
        if let Some(index) = names.iter().position(|n| n == name) {
            return Ok(AppId::from_index(index));
        }
        names.push(name.to_string());
        Ok(AppId::from_index(names.len() - 1))
    }

    pub(crate) fn name(&self, app: AppId) -> Option<String> {
        self.names.read().get(app.index()).cloned()
    }

    /// Builds `"{AppName}.{table}"` for a registered application.
    pub(crate) fn qualified_name(&self, app: AppId, table: &str) -> Option<String> {
        self.names.read().get(app.index()).map(|app_name| format!("{app_name}.{table}"))
    }
}

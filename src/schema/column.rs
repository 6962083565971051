use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::types::{ColumnType, RowValues};

/// One column, either declared by the application or reported by the backend.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
    pub primary: bool,
    pub unique: bool,
    pub index: bool,
    pub hashindex: bool,
    pub readonly: bool,
    pub writeonly: bool,
    pub hidden: bool,
    /// Stamp with the current time on every write.
    pub now: bool,
    /// Default used by `add`/`put` when the record leaves the column unset.
    pub value: Option<RowValues>,
    /// Component columns joined with `|` into this one.
    pub join: Vec<String>,
    pub maxlength: Option<usize>,
    /// Declared but missing from the live schema.
    pub fake: bool,
    pub data_type: Option<String>,
    pub nullable: bool,
    pub position: Option<u32>,
    pub serial: bool,
}

impl ColumnDef {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nullable: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_type(mut self, ty: ColumnType) -> Self {
        self.ty = ty;
        self
    }

    #[must_use]
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.index = true;
        self
    }

    #[must_use]
    pub fn hashindex(mut self) -> Self {
        self.hashindex = true;
        self
    }

    #[must_use]
    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    #[must_use]
    pub fn writeonly(mut self) -> Self {
        self.writeonly = true;
        self
    }

    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    #[must_use]
    pub fn now(mut self) -> Self {
        self.now = true;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<RowValues>) -> Self {
        self.value = Some(value.into());
        self
    }

    #[must_use]
    pub fn join<I, S>(mut self, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.join = parts.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn maxlength(mut self, len: usize) -> Self {
        self.maxlength = Some(len);
        self
    }

    /// Copy the application's declared attributes onto a live column.
    pub(crate) fn overlay(&mut self, declared: &ColumnDef) {
        if declared.ty != ColumnType::Text || matches!(self.ty, ColumnType::Other(_)) {
            self.ty = declared.ty.clone();
        }
        self.primary |= declared.primary;
        self.unique |= declared.unique;
        self.index |= declared.index;
        self.hashindex = declared.hashindex;
        self.readonly = declared.readonly;
        self.writeonly = declared.writeonly;
        self.hidden = declared.hidden;
        self.now = declared.now;
        if declared.value.is_some() {
            self.value.clone_from(&declared.value);
        }
        self.join.clone_from(&declared.join);
        self.maxlength = declared.maxlength;
    }
}

/// JSON shape of a column body: `{"type": "int", "primary": true, ...}`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct ColumnBody {
    #[serde(rename = "type")]
    ty: Option<ColumnType>,
    primary: bool,
    unique: bool,
    index: bool,
    hashindex: bool,
    readonly: bool,
    writeonly: bool,
    hidden: bool,
    now: bool,
    value: Option<JsonValue>,
    join: Vec<String>,
    maxlength: Option<usize>,
    #[serde(rename = "notnull")]
    not_null: bool,
}

impl ColumnBody {
    pub(crate) fn into_def(self, name: String) -> ColumnDef {
        ColumnDef {
            name,
            ty: self.ty.unwrap_or_default(),
            primary: self.primary,
            unique: self.unique,
            index: self.index,
            hashindex: self.hashindex,
            readonly: self.readonly,
            writeonly: self.writeonly,
            hidden: self.hidden,
            now: self.now,
            value: self.value.as_ref().map(RowValues::from_json),
            join: self.join,
            maxlength: self.maxlength,
            nullable: !self.not_null && !self.primary,
            ..ColumnDef::default()
        }
    }
}

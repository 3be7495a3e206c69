//! Resolved column schemas.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::value::ColumnType;

/// One resolved column: name, position, declared or inferred type, and the
/// string-sticky flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub index: usize,
    /// `None` means no type was declared or inferred; cells convert per the
    /// reader's field-type-inference policy.
    pub ty: Option<ColumnType>,
    /// Once set, the column is pinned to string and never parsed again.
    pub finalized: bool,
}

/// The resolved schema of one stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    columns: Vec<ColumnDescriptor>,
}

impl Schema {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns = names
            .into_iter()
            .enumerate()
            .map(|(index, name)| ColumnDescriptor {
                name: name.into(),
                index,
                ty: None,
                finalized: false,
            })
            .collect();
        Schema { columns }
    }

    /// A schema of `width` synthetic columns named `Column1..ColumnN`.
    pub fn synthetic(width: usize) -> Self {
        Self::from_names((1..=width).map(|i| format!("Column{i}")))
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&ColumnDescriptor> {
        self.columns.get(index)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Assign declared types, e.g. from the inference engine.
    pub fn set_types(&mut self, types: Vec<Option<ColumnType>>) {
        for (column, ty) in self.columns.iter_mut().zip(types) {
            column.ty = ty;
        }
    }

    /// Pin a column to string after a runtime conversion failure. The
    /// finalized flag never reverts.
    pub fn demote(&mut self, index: usize) {
        if let Some(column) = self.columns.get_mut(index) {
            column.ty = Some(ColumnType::Str);
            column.finalized = true;
        }
    }

    /// A stable hash over names and declared types, used to key cached
    /// materialization plans.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for column in &self.columns {
            column.name.hash(&mut hasher);
            column.ty.hash(&mut hasher);
        }
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn synthetic_names_are_one_based() {
        let schema = Schema::synthetic(3);
        let names: Vec<_> = schema.names().collect();
        assert_eq!(names, vec!["Column1", "Column2", "Column3"]);
    }

    #[test]
    fn demotion_is_sticky() {
        let mut schema = Schema::from_names(["a"]);
        schema.set_types(vec![Some(ColumnType::I32)]);
        schema.demote(0);
        let column = schema.column(0).unwrap();
        assert_eq!(column.ty, Some(ColumnType::Str));
        assert!(column.finalized);
    }

    #[test]
    fn fingerprint_tracks_names_and_types() {
        let a = Schema::from_names(["x", "y"]);
        let b = Schema::from_names(["x", "y"]);
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut c = Schema::from_names(["x", "y"]);
        c.set_types(vec![Some(ColumnType::I64), None]);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}

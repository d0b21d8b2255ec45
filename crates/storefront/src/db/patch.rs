//! Typed partial updates.
//!
//! A [`Patch`] is a list of `(column, value)` pairs for one row. Each table
//! defines an enum of the fields it allows to change; the patch turns that
//! list into a single parameterized `UPDATE`. Columns are emitted in sorted
//! order and a field set twice keeps its last value, so the same set of
//! changes always produces the same SQL text.

use sqlx::postgres::Postgres;
use sqlx::query_builder::Separated;
use sqlx::{PgConnection, QueryBuilder};

use super::RepositoryError;

/// A single updatable column with its new value.
pub trait PatchField {
    /// Column name as it appears in SQL.
    fn column(&self) -> &'static str;

    /// Push `column = $n` and bind the value.
    fn push(self, set: &mut Separated<'_, 'static, Postgres, &'static str>);
}

/// A pending update of one row identified by its integer primary key.
#[derive(Debug)]
pub struct Patch<F> {
    table: &'static str,
    fields: Vec<F>,
}

impl<F: PatchField> Patch<F> {
    /// Start an empty patch for `table` (schema-qualified).
    #[must_use]
    pub const fn new(table: &'static str) -> Self {
        Self {
            table,
            fields: Vec::new(),
        }
    }

    /// Set a field, replacing any earlier value for the same column.
    #[must_use]
    pub fn set(mut self, field: F) -> Self {
        self.fields.retain(|f| f.column() != field.column());
        self.fields.push(field);
        self
    }

    /// Set a field only when `field` is `Some`.
    #[must_use]
    pub fn set_some(self, field: Option<F>) -> Self {
        match field {
            Some(field) => self.set(field),
            None => self,
        }
    }

    /// Whether no fields have been set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Columns this patch will write, in emission order.
    #[must_use]
    pub fn columns(&self) -> Vec<&'static str> {
        let mut columns: Vec<_> = self.fields.iter().map(PatchField::column).collect();
        columns.sort_unstable();
        columns
    }

    /// Build the `UPDATE` statement for the row with primary key `id`.
    ///
    /// `updated_at` is always bumped when `touch_updated_at` is set.
    #[must_use]
    pub fn into_query(self, id: i32, touch_updated_at: bool) -> QueryBuilder<'static, Postgres> {
        let mut fields = self.fields;
        fields.sort_by_key(PatchField::column);

        let mut builder = QueryBuilder::new("UPDATE ");
        builder.push(self.table).push(" SET ");
        {
            let mut set = builder.separated(", ");
            for field in fields {
                field.push(&mut set);
            }
            if touch_updated_at {
                set.push("updated_at = NOW()");
            }
        }
        builder.push(" WHERE id = ").push_bind(id);
        builder
    }

    /// Apply the patch inside the caller's transaction.
    ///
    /// An empty patch is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no row has the given id.
    /// Returns `RepositoryError::Database` if the update fails.
    pub async fn apply(
        self,
        conn: &mut PgConnection,
        id: i32,
        touch_updated_at: bool,
    ) -> Result<(), RepositoryError> {
        if self.is_empty() {
            return Ok(());
        }
        let mut builder = self.into_query(id, touch_updated_at);
        let result = builder.build().execute(&mut *conn).await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    enum TestField {
        Status(String),
        Note(Option<String>),
    }

    impl PatchField for TestField {
        fn column(&self) -> &'static str {
            match self {
                Self::Status(_) => "status",
                Self::Note(_) => "note",
            }
        }

        fn push(self, set: &mut Separated<'_, 'static, Postgres, &'static str>) {
            set.push(self.column()).push_unseparated(" = ");
            match self {
                Self::Status(v) => set.push_bind_unseparated(v),
                Self::Note(v) => set.push_bind_unseparated(v),
            };
        }
    }

    #[test]
    fn test_columns_are_emitted_in_sorted_order() {
        let patch = Patch::new("store.things")
            .set(TestField::Status("open".to_owned()))
            .set(TestField::Note(None));
        let builder = patch.into_query(7, false);
        assert_eq!(
            builder.sql(),
            "UPDATE store.things SET note = $1, status = $2 WHERE id = $3"
        );
    }

    #[test]
    fn test_call_order_does_not_change_sql() {
        let a = Patch::new("store.things")
            .set(TestField::Note(Some("x".to_owned())))
            .set(TestField::Status("open".to_owned()))
            .into_query(1, true);
        let b = Patch::new("store.things")
            .set(TestField::Status("closed".to_owned()))
            .set(TestField::Note(None))
            .into_query(1, true);
        assert_eq!(a.sql(), b.sql());
    }

    #[test]
    fn test_last_value_wins_for_repeated_field() {
        let patch = Patch::new("store.things")
            .set(TestField::Status("open".to_owned()))
            .set(TestField::Status("closed".to_owned()));
        assert_eq!(patch.columns(), vec!["status"]);
    }

    #[test]
    fn test_touch_updated_at() {
        let builder = Patch::new("store.things")
            .set(TestField::Status("open".to_owned()))
            .into_query(3, true);
        assert_eq!(
            builder.sql(),
            "UPDATE store.things SET status = $1, updated_at = NOW() WHERE id = $2"
        );
    }

    #[test]
    fn test_set_some_skips_none() {
        let patch: Patch<TestField> = Patch::new("store.things").set_some(None);
        assert!(patch.is_empty());
    }
}

//! Transaction options shared by every driver.

/// PostgreSQL transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostgresTransactionType {
    /// READ UNCOMMITTED isolation level
    ReadUncommitted,
    /// READ COMMITTED isolation level (PostgreSQL default)
    #[default]
    ReadCommitted,
    /// REPEATABLE READ isolation level
    RepeatableRead,
    /// SERIALIZABLE isolation level
    Serializable,
}

impl core::fmt::Display for PostgresTransactionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let level = match self {
            PostgresTransactionType::ReadUncommitted => "READ UNCOMMITTED",
            PostgresTransactionType::ReadCommitted => "READ COMMITTED",
            PostgresTransactionType::RepeatableRead => "REPEATABLE READ",
            PostgresTransactionType::Serializable => "SERIALIZABLE",
        };
        write!(f, "{}", level)
    }
}

/// Options of a top-level `BEGIN`. Ignored by nested transactions, which
/// become savepoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionOptions {
    pub isolation: Option<PostgresTransactionType>,
    pub read_only: bool,
    pub deferrable: bool,
}

impl TransactionOptions {
    pub fn isolation(mut self, level: PostgresTransactionType) -> Self {
        self.isolation = Some(level);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Only meaningful for serializable read-only transactions.
    pub fn deferrable(mut self) -> Self {
        self.deferrable = true;
        self
    }

    /// `BEGIN [ISOLATION LEVEL ...] [READ ONLY] [DEFERRABLE]`
    pub fn begin_statement(&self) -> String {
        let mut sql = String::from("BEGIN");
        if let Some(level) = self.isolation {
            sql.push_str(" ISOLATION LEVEL ");
            sql.push_str(&level.to_string());
        }
        if self.read_only {
            sql.push_str(" READ ONLY");
        }
        if self.deferrable {
            sql.push_str(" DEFERRABLE");
        }
        sql
    }
}

impl From<PostgresTransactionType> for TransactionOptions {
    fn from(level: PostgresTransactionType) -> Self {
        TransactionOptions::default().isolation(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_statement() {
        assert_eq!(TransactionOptions::default().begin_statement(), "BEGIN");
        assert_eq!(
            TransactionOptions::from(PostgresTransactionType::Serializable)
                .read_only()
                .deferrable()
                .begin_statement(),
            "BEGIN ISOLATION LEVEL SERIALIZABLE READ ONLY DEFERRABLE"
        );
    }
}

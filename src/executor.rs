use crate::backend::{Backend, BackendError};
use snafu::{ensure, ResultExt, Snafu};
use tracing::debug;

/// Message text the server reports once a table has been rebuilt.
pub const SUCCESS_MARKER: &str = "OK";

#[derive(Debug, Snafu)]
pub enum ExecutorError {
    #[snafu(display("Invalid identifier: {:?}", name))]
    InvalidIdentifier { name: String },

    #[snafu(display("Maintenance command failed: {}", source))]
    Maintenance { source: BackendError },
}

type Result<T, E = ExecutorError> = std::result::Result<T, E>;

/// Quotes `name` as a MySQL backtick identifier.
pub fn quote_identifier(name: &str) -> Result<String> {
    ensure!(
        !name.is_empty() && !name.contains('\0'),
        InvalidIdentifierSnafu { name }
    );
    Ok(format!("`{}`", name.replace('`', "``")))
}

pub fn optimize_statement(database: &str, table: &str) -> Result<String> {
    Ok(format!(
        "OPTIMIZE TABLE {}.{}",
        quote_identifier(database)?,
        quote_identifier(table)?
    ))
}

/// True when any status message is exactly the success marker.
pub fn is_success<S: AsRef<str>>(messages: &[S]) -> bool {
    messages.iter().any(|m| m.as_ref() == SUCCESS_MARKER)
}

/// Runs `OPTIMIZE TABLE` for one table and classifies the server's reply.
pub async fn optimize_table<B>(backend: &mut B, database: &str, table: &str) -> Result<bool>
where
    B: Backend + ?Sized,
{
    let statement = optimize_statement(database, table)?;
    let messages = backend
        .run_maintenance(&statement)
        .await
        .context(MaintenanceSnafu)?;

    debug!("{} returned {:?}", statement, messages);
    Ok(is_success(messages.as_slice()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;
    use rstest::rstest;

    #[rstest]
    #[case("users", "`users`")]
    #[case("order items", "`order items`")]
    #[case("we`ird", "`we``ird`")]
    #[case("`", "````")]
    fn quotes_identifiers(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(quote_identifier(name).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("bad\0name")]
    fn rejects_unusable_identifiers(#[case] name: &str) {
        assert!(matches!(
            quote_identifier(name),
            Err(ExecutorError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn statement_qualifies_table_with_database() {
        assert_eq!(
            optimize_statement("shop", "users").unwrap(),
            "OPTIMIZE TABLE `shop`.`users`"
        );
    }

    #[rstest]
    #[case(&["OK"], true)]
    #[case(&["Table does not support optimize, doing recreate + analyze instead", "OK"], true)]
    #[case(&["Table does not support optimize"], false)]
    #[case(&["ok"], false)]
    #[case(&["OK, but slowly"], false)]
    #[case(&[], false)]
    fn classifies_status_messages(#[case] messages: &[&str], #[case] expected: bool) {
        assert_eq!(is_success(messages), expected);
    }

    #[tokio::test]
    async fn optimize_table_issues_quoted_statement() {
        let mut backend = FakeBackend::new()
            .with_schema("shop", &["users"])
            .respond("users", &["Table does not support optimize, doing recreate + analyze instead", "OK"]);

        let success = optimize_table(&mut backend, "shop", "users").await.unwrap();

        assert!(success);
        assert_eq!(backend.statements, vec!["OPTIMIZE TABLE `shop`.`users`"]);
    }

    #[tokio::test]
    async fn transport_failure_propagates() {
        let mut backend = FakeBackend::new()
            .with_schema("shop", &["users"])
            .break_on("users");

        let err = optimize_table(&mut backend, "shop", "users").await.unwrap_err();
        assert!(matches!(err, ExecutorError::Maintenance { .. }));
    }
}

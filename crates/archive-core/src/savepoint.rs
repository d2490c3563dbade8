//! Nested transactional scopes over a single SQLite connection.
//!
//! Grounded on `internal/dbsavepoint/dbsavepoint.go` and
//! `internal/ctxdb/ctxdb.go`'s `UsingSavepoint`/`UsingTx` helpers. Three ways
//! to open a scope: from a pool (begins a transaction and the outermost
//! savepoint; the scope owns the transaction), from an existing connection
//! (opens a savepoint inside it; does not own the transaction), or from a
//! parent savepoint (nested, dot-joined name).

use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};

use crate::error::RuntimeError;

enum Conn<'c> {
    Owned(PoolConnection<Sqlite>),
    Borrowed(&'c mut SqliteConnection),
}

impl<'c> Conn<'c> {
    fn as_mut(&mut self) -> &mut SqliteConnection {
        match self {
            Conn::Owned(conn) => conn,
            Conn::Borrowed(conn) => conn,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminal {
    Released,
    RolledBack,
}

/// A nested transactional scope. See the module docs for how scopes compose.
pub struct Savepoint<'c> {
    name: String,
    conn: Conn<'c>,
    terminal: Option<Terminal>,
}

impl<'c> Savepoint<'c> {
    /// Begin a transaction on a freshly acquired connection and open the
    /// outermost savepoint. This scope owns the transaction: [`release`] will
    /// commit it, [`rollback`] will abort it.
    ///
    /// [`release`]: Savepoint::release
    /// [`rollback`]: Savepoint::rollback
    pub async fn from_pool(pool: &SqlitePool, name: impl Into<String>) -> Result<Savepoint<'static>, RuntimeError> {
        let mut conn = pool.acquire().await?;
        sqlx::query("BEGIN").execute(&mut *conn).await?;
        let name = name.into();
        sqlx::query(&format!("SAVEPOINT {name}")).execute(&mut *conn).await?;

        Ok(Savepoint {
            name,
            conn: Conn::Owned(conn),
            terminal: None,
        })
    }

    /// Open a savepoint inside a connection the caller already owns a
    /// transaction on. This scope does not own the transaction: [`release`]
    /// and [`rollback`] only affect the savepoint, never the surrounding
    /// transaction.
    ///
    /// [`release`]: Savepoint::release
    /// [`rollback`]: Savepoint::rollback
    pub async fn from_connection(
        conn: &'c mut SqliteConnection,
        name: impl Into<String>,
    ) -> Result<Savepoint<'c>, RuntimeError> {
        let name = name.into();
        sqlx::query(&format!("SAVEPOINT {name}")).execute(&mut *conn).await?;

        Ok(Savepoint {
            name,
            conn: Conn::Borrowed(conn),
            terminal: None,
        })
    }

    /// Open a nested savepoint inside this one. The child's name is this
    /// scope's name, a dot, and `name`. While the child is alive this scope
    /// cannot be used (the borrow checker enforces the same discipline the
    /// original relies on programmer care for).
    pub async fn create_child(&mut self, name: impl Into<String>) -> Result<Savepoint<'_>, RuntimeError> {
        self.ensure_active()?;

        let full_name = format!("{}.{}", self.name, name.into());
        let conn = self.conn.as_mut();
        sqlx::query(&format!("SAVEPOINT {full_name}")).execute(&mut *conn).await?;

        Ok(Savepoint {
            name: full_name,
            conn: Conn::Borrowed(conn),
            terminal: None,
        })
    }

    fn ensure_active(&self) -> Result<(), RuntimeError> {
        match self.terminal {
            Some(Terminal::Released) => Err(RuntimeError::AlreadyReleased),
            Some(Terminal::RolledBack) => Err(RuntimeError::AlreadyRolledBack),
            None => Ok(()),
        }
    }

    /// Borrow the underlying connection for an arbitrary query or exec,
    /// delegating to the owning transaction or parent scope. Fails if this
    /// scope has already been released or rolled back.
    pub fn connection(&mut self) -> Result<&mut SqliteConnection, RuntimeError> {
        self.ensure_active()?;
        Ok(self.conn.as_mut())
    }

    /// Commit this scope: releases the savepoint, and if this scope owns the
    /// underlying transaction, commits it too.
    pub async fn release(mut self) -> Result<(), RuntimeError> {
        self.ensure_active()?;
        self.terminal = Some(Terminal::Released);

        let name = self.name.clone();
        sqlx::query(&format!("RELEASE SAVEPOINT {name}"))
            .execute(self.conn.as_mut())
            .await?;

        if let Conn::Owned(conn) = &mut self.conn {
            sqlx::query("COMMIT").execute(&mut **conn).await?;
        }

        Ok(())
    }

    /// Abort this scope: rolls back to the savepoint, and if this scope owns
    /// the underlying transaction, rolls that back too (not merely the
    /// savepoint within it).
    pub async fn rollback(mut self) -> Result<(), RuntimeError> {
        self.ensure_active()?;
        self.terminal = Some(Terminal::RolledBack);

        let name = self.name.clone();
        sqlx::query(&format!("ROLLBACK TO SAVEPOINT {name}"))
            .execute(self.conn.as_mut())
            .await?;

        if let Conn::Owned(conn) = &mut self.conn {
            sqlx::query("ROLLBACK").execute(&mut **conn).await?;
        }

        Ok(())
    }
}

/// Open a fresh outermost scope from `pool`, run `f` inside it, and
/// guarantee exactly one of release/rollback runs: release on success,
/// rollback (joined with any rollback error) on failure.
pub async fn with_transaction<F, T>(pool: &SqlitePool, name: impl Into<String>, f: F) -> Result<T, RuntimeError>
where
    F: AsyncFnOnce(&mut Savepoint<'static>) -> Result<T, RuntimeError>,
{
    let mut scope = Savepoint::from_pool(pool, name).await?;
    let result = f(&mut scope).await;
    finish(scope, result).await
}

/// Open a nested scope under `parent`, run `f` inside it, and guarantee
/// exactly one of release/rollback runs, same as [`with_transaction`].
pub async fn with_savepoint<'p, F, T>(
    parent: &'p mut Savepoint<'_>,
    name: impl Into<String>,
    f: F,
) -> Result<T, RuntimeError>
where
    F: AsyncFnOnce(&mut Savepoint<'_>) -> Result<T, RuntimeError>,
{
    let mut child = parent.create_child(name).await?;
    let result = f(&mut child).await;
    finish(child, result).await
}

async fn finish<T>(scope: Savepoint<'_>, result: Result<T, RuntimeError>) -> Result<T, RuntimeError> {
    match result {
        Ok(value) => {
            scope.release().await?;
            Ok(value)
        }
        Err(err) => match scope.rollback().await {
            Ok(()) => Err(err),
            Err(rollback_err) => Err(RuntimeError::join(err, rollback_err)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::Row;

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("create table widgets (name text not null)")
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    #[tokio::test]
    async fn release_commits() {
        let pool = pool().await;

        with_transaction(&pool, "sp", async move |sp| {
            sqlx::query("insert into widgets (name) values ('a')")
                .execute(sp.connection()?)
                .await?;
            Ok(())
        })
        .await
        .unwrap();

        let row = sqlx::query("select count(*) as n from widgets")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.get::<i64, _>("n"), 1);
    }

    #[tokio::test]
    async fn rollback_discards_outer_transaction() {
        let pool = pool().await;

        let result: Result<(), RuntimeError> = with_transaction(&pool, "sp", async move |sp| {
            sqlx::query("insert into widgets (name) values ('a')")
                .execute(sp.connection()?)
                .await?;
            Err(RuntimeError::NotConfigured("boom"))
        })
        .await;

        assert!(result.is_err());

        let row = sqlx::query("select count(*) as n from widgets")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.get::<i64, _>("n"), 0);
    }

    #[tokio::test]
    async fn nested_savepoint_can_roll_back_independently() {
        let pool = pool().await;

        with_transaction(&pool, "outer", async move |outer| {
            sqlx::query("insert into widgets (name) values ('kept')")
                .execute(outer.connection()?)
                .await?;

            let inner_result: Result<(), RuntimeError> = with_savepoint(outer, "inner", async move |inner| {
                sqlx::query("insert into widgets (name) values ('discarded')")
                    .execute(inner.connection()?)
                    .await?;
                Err(RuntimeError::NotConfigured("nested failure"))
            })
            .await;
            assert!(inner_result.is_err());

            Ok(())
        })
        .await
        .unwrap();

        let row = sqlx::query("select count(*) as n from widgets")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.get::<i64, _>("n"), 1);
    }

    #[tokio::test]
    async fn operations_after_release_or_rollback_fail_distinctly() {
        let pool = pool().await;

        let mut sp = Savepoint::from_pool(&pool, "sp").await.unwrap();
        assert!(sp.connection().is_ok());
        sp.terminal = Some(Terminal::Released);
        assert!(matches!(sp.connection(), Err(RuntimeError::AlreadyReleased)));

        let mut sp2 = Savepoint::from_pool(&pool, "sp2").await.unwrap();
        sp2.terminal = Some(Terminal::RolledBack);
        assert!(matches!(sp2.connection(), Err(RuntimeError::AlreadyRolledBack)));
    }
}

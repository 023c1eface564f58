use std::fmt;

use super::Multiplexer;
use crate::cmd::Cmd;
use crate::context::{CommandFlags, DestinationContext};
use crate::types::{RedisResult, Value};

/// A cheap view of one database, executing commands through its destination context.
#[derive(Clone)]
pub struct Database {
    multiplexer: Multiplexer,
    context: DestinationContext,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("context", &self.context)
            .finish()
    }
}

impl Database {
    pub(crate) fn new(multiplexer: Multiplexer, context: DestinationContext) -> Self {
        Self {
            multiplexer,
            context,
        }
    }

    /// The database index.
    pub fn database(&self) -> i64 {
        self.context.database()
    }

    /// The context commands are executed with.
    pub fn context(&self) -> &DestinationContext {
        &self.context
    }

    /// Executes `cmd` and resolves to its reply.
    ///
    /// ```rust,no_run
    /// # async fn run(mux: redis_mux::Multiplexer) -> redis_mux::RedisResult<()> {
    /// let db = mux.database(2);
    /// db.execute(redis_mux::cmd("SET").arg("key").arg(42).clone()).await?;
    /// # Ok(()) }
    /// ```
    pub async fn execute(&self, cmd: Cmd) -> RedisResult<Value> {
        self.multiplexer
            .execute(&self.context, cmd, CommandFlags::empty())
            .await
    }

    /// Executes `cmd` with additional flags, e.g. retry flags for this command only.
    pub async fn execute_with_flags(&self, cmd: Cmd, flags: CommandFlags) -> RedisResult<Value> {
        self.multiplexer.execute(&self.context, cmd, flags).await
    }

    /// Executes `cmd`, blocking the calling thread. See [`Multiplexer::wait`].
    pub fn execute_blocking(&self, cmd: Cmd) -> RedisResult<Value> {
        let db = self.clone();
        self.multiplexer
            .wait(async move { db.execute(cmd).await })
    }
}

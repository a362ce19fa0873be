use crate::connection::{BaseConnection, ExecCommand};
use crate::generators::{PqGen, Step};
use crate::generic_client::GenericConnection;
use crate::pq::TransactionStatus;
use crate::Error;
use log::{debug, warn};
use std::panic::{self, AssertUnwindSafe};

/// A transaction block entered on a connection.
#[derive(Debug)]
struct Block {
    // empty for an outer block entered without a savepoint name
    name: String,
    // the block started the transaction
    outer: bool,
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn enter_command(block: &Block) -> String {
    let mut commands = vec![];
    if block.outer {
        commands.push("begin".to_string());
    }
    if !block.name.is_empty() {
        commands.push(format!("savepoint {}", quote_ident(&block.name)));
    }
    commands.join("; ")
}

fn exit_command(block: &Block, commit: bool) -> String {
    let mut commands = vec![];
    if !block.outer {
        let name = quote_ident(&block.name);
        if !commit {
            commands.push(format!("rollback to savepoint {}", name));
        }
        commands.push(format!("release savepoint {}", name));
    } else if commit {
        commands.push("commit".to_string());
    } else {
        commands.push("rollback".to_string());
    }
    commands.join("; ")
}

struct EnterBlock {
    name: Option<String>,
    block: Option<Block>,
    exec: Option<ExecCommand>,
}

impl PqGen<BaseConnection> for EnterBlock {
    type Output = Block;

    fn resume(&mut self, cx: &mut BaseConnection) -> Result<Step<Block>, Error> {
        let exec = match &mut self.exec {
            Some(exec) => exec,
            None => {
                cx.check_open()?;
                let outer = cx.pgconn.transaction_status() == TransactionStatus::Idle;
                let name = match self.name.take() {
                    Some(name) => name,
                    None if outer => String::new(),
                    None => format!("_pg3_{}", cx.savepoints.len() + 1),
                };
                let block = Block { name, outer };
                let exec = ExecCommand::new(enter_command(&block));
                self.block = Some(block);
                self.exec.insert(exec)
            }
        };
        ready!(exec.resume(cx)?);
        let block = self.block.take().ok_or_else(Error::unexpected_message)?;
        cx.savepoints.push(block.name.clone());
        Ok(Step::Ready(block))
    }
}

struct ExitBlock {
    block: Block,
    commit: bool,
    exec: Option<ExecCommand>,
}

impl PqGen<BaseConnection> for ExitBlock {
    type Output = ();

    fn resume(&mut self, cx: &mut BaseConnection) -> Result<Step<()>, Error> {
        let exec = match &mut self.exec {
            Some(exec) => exec,
            None => {
                match cx.savepoints.pop() {
                    Some(name) if name == self.block.name => {}
                    _ => {
                        return Err(Error::programming(format!(
                            "transaction block {:?} exited out of order",
                            self.block.name
                        )))
                    }
                }
                cx.check_open()?;
                debug!(
                    "{} transaction block {:?}",
                    if self.commit { "committing" } else { "rolling back" },
                    self.block
                );
                self.exec
                    .insert(ExecCommand::new(exit_command(&self.block, self.commit)))
            }
        };
        exec.resume(cx)
    }
}

/// Runs `body` in a transaction block: see `Connection::transaction`.
pub(crate) fn transaction<C, T, F>(
    conn: &C,
    savepoint_name: Option<&str>,
    force_rollback: bool,
    body: F,
) -> Result<T, Error>
where
    C: GenericConnection,
    F: FnOnce(&C) -> Result<T, Error>,
{
    let block = conn.run(EnterBlock {
        name: savepoint_name.map(str::to_string),
        block: None,
        exec: None,
    })?;

    let exit = |block, commit| {
        conn.run(ExitBlock {
            block,
            commit,
            exec: None,
        })
    };

    match panic::catch_unwind(AssertUnwindSafe(|| body(conn))) {
        Ok(Ok(value)) => {
            exit(block, !force_rollback)?;
            Ok(value)
        }
        Ok(Err(e)) => {
            if let Err(rollback) = exit(block, false) {
                warn!("error ignored in rollback: {}", rollback);
            }
            Err(e)
        }
        Err(payload) => {
            if let Err(rollback) = exit(block, false) {
                warn!("error ignored in rollback: {}", rollback);
            }
            panic::resume_unwind(payload)
        }
    }
}

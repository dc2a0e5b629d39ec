//! Function-name dispatch.
//!
//! Callers address the ledger with a function name and a list of raw string
//! arguments. The [`Dispatcher`] owns a fixed table built once in
//! [`Dispatcher::new`] and resolves each name to a handler. Mutating
//! functions are reachable through [`InvocationKind::Invoke`] only, `read`
//! through [`InvocationKind::Query`] only.

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::ledger::{parse_amount, Ledger, LedgerError};
use crate::storage::StateStore;

/// Bytes handed back to the caller. `None` means the call has no result.
pub type Payload = Option<Vec<u8>>;

/// Signature shared by every routed function.
pub type Handler<S> = fn(&Ledger<S>, &[String]) -> Result<Payload, LedgerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationKind {
    Invoke,
    Query,
}

impl fmt::Display for InvocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationKind::Invoke => f.write_str("invoke"),
            InvocationKind::Query => f.write_str("query"),
        }
    }
}

struct Route<S: StateStore> {
    kind: InvocationKind,
    handler: Handler<S>,
}

pub struct Dispatcher<S: StateStore> {
    routes: BTreeMap<&'static str, Route<S>>,
}

impl<S: StateStore> Default for Dispatcher<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: StateStore> Dispatcher<S> {
    pub fn new() -> Self {
        let table: [(&'static str, InvocationKind, Handler<S>); 5] = [
            ("init", InvocationKind::Invoke, handle_init),
            ("createAccount", InvocationKind::Invoke, handle_create_account),
            ("set_user", InvocationKind::Invoke, handle_transfer),
            ("write", InvocationKind::Invoke, handle_write),
            ("read", InvocationKind::Query, handle_read),
        ];
        let routes = table
            .into_iter()
            .map(|(name, kind, handler)| (name, Route { kind, handler }))
            .collect();
        Dispatcher { routes }
    }

    /// Names reachable through the given entry point, in sorted order.
    pub fn functions(&self, kind: InvocationKind) -> Vec<&'static str> {
        self.routes
            .iter()
            .filter(|(_, route)| route.kind == kind)
            .map(|(name, _)| *name)
            .collect()
    }

    pub fn dispatch(
        &self,
        ledger: &Ledger<S>,
        kind: InvocationKind,
        function: &str,
        args: &[String],
    ) -> Result<Payload, LedgerError> {
        debug!(%kind, function, args = args.len(), "dispatching");
        match self.routes.get(function) {
            Some(route) if route.kind == kind => (route.handler)(ledger, args),
            _ => {
                debug!(%kind, function, "no route for function");
                Err(LedgerError::UnknownFunction(format!("{} {}", kind, function)))
            }
        }
    }
}

fn expect_args<'a>(
    function: &str,
    args: &'a [String],
    names: &[&str],
) -> Result<&'a [String], LedgerError> {
    if args.len() != names.len() {
        return Err(LedgerError::InvalidArgument(format!(
            "Incorrect number of arguments for {}: expecting {} ({}), got {}",
            function,
            names.len(),
            names.join(", "),
            args.len()
        )));
    }
    Ok(args)
}

fn handle_init<S: StateStore>(ledger: &Ledger<S>, args: &[String]) -> Result<Payload, LedgerError> {
    let args = expect_args("init", args, &["initial value"])?;
    let value = args[0].parse::<i64>().map_err(|_| {
        LedgerError::InvalidArgument(format!(
            "Expecting integer value for diagnostic key, got {:?}",
            args[0]
        ))
    })?;
    ledger.init(value)?;
    Ok(None)
}

fn handle_create_account<S: StateStore>(
    ledger: &Ledger<S>,
    args: &[String],
) -> Result<Payload, LedgerError> {
    let args = expect_args("createAccount", args, &["account id"])?;
    let account = ledger.create_account(&args[0])?;
    let encoded = account.encode().map_err(|source| LedgerError::Encode {
        id: account.id.clone(),
        source,
    })?;
    Ok(Some(encoded))
}

// Positional order follows the deployed surface: sender, amount, recipient.
fn handle_transfer<S: StateStore>(
    ledger: &Ledger<S>,
    args: &[String],
) -> Result<Payload, LedgerError> {
    let args = expect_args("set_user", args, &["from account", "amount", "to account"])?;
    let amount = parse_amount(&args[1])?;
    ledger.transfer(&args[0], &args[2], amount)?;
    Ok(None)
}

fn handle_write<S: StateStore>(ledger: &Ledger<S>, args: &[String]) -> Result<Payload, LedgerError> {
    let args = expect_args("write", args, &["key", "value"])?;
    ledger.write(&args[0], args[1].as_bytes())?;
    Ok(None)
}

fn handle_read<S: StateStore>(ledger: &Ledger<S>, args: &[String]) -> Result<Payload, LedgerError> {
    let args = expect_args("read", args, &["key"])?;
    Ok(Some(ledger.read(&args[0])?))
}

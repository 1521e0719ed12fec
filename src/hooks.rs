//! Per-table lifecycle callbacks.
//!
//! `before_*` and `after_*` hooks run inside the statement's transaction; a
//! failing hook rolls it back. `*_commit` hooks are queued and run once the
//! outermost transaction commits.

use std::{borrow::Cow, future::Future, sync::Arc};

use futures_util::future::BoxFuture;
use relq_core::Result;
use relq_postgres::Record;

use crate::row::Row;

macro_rules! hook_kinds {
    ($($name:ident),* $(,)?) => {
        paste::paste! {
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub enum HookKind {
                $([<$name:camel>],)*
            }

            impl HookKind {
                pub const ALL: &[HookKind] = &[$(HookKind::[<$name:camel>],)*];

                pub fn name(self) -> &'static str {
                    match self {
                        $(HookKind::[<$name:camel>] => stringify!($name),)*
                    }
                }
            }

            impl Hooks {
                $(
                    #[doc = concat!("Registers a `", stringify!($name), "` hook.")]
                    pub fn $name<F, Fut>(self, hook: F) -> Self
                    where
                        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
                        Fut: Future<Output = Result<()>> + Send + 'static,
                    {
                        self.on(HookKind::[<$name:camel>], hook)
                    }
                )*
            }
        }
    };
}

hook_kinds! {
    before_create,
    after_create,
    after_create_commit,
    before_update,
    after_update,
    after_update_commit,
    before_delete,
    after_delete,
    after_delete_commit,
}

impl HookKind {
    /// Runs after `COMMIT` rather than inside the transaction.
    pub fn is_commit(self) -> bool {
        matches!(
            self,
            HookKind::AfterCreateCommit | HookKind::AfterUpdateCommit | HookKind::AfterDeleteCommit
        )
    }
}

/// What a hook is called with.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub table: Cow<'static, str>,
    pub kind: HookKind,
    /// Affected rows; empty for `before_*` hooks of plain statements
    pub rows: Arc<[Row]>,
    /// Values being written, for create and update
    pub data: Option<Arc<Record>>,
}

type HookFn = Arc<dyn Fn(HookContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Hooks of one table, in registration order per kind.
#[derive(Clone, Default)]
pub struct Hooks {
    hooks: Vec<(HookKind, HookFn)>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.hooks.iter().map(|(kind, _)| kind)).finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F, Fut>(mut self, kind: HookKind, hook: F) -> Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let hook: HookFn = Arc::new(move |context| -> BoxFuture<'static, Result<()>> { Box::pin(hook(context)) });
        self.hooks.push((kind, hook));
        self
    }

    pub fn has(&self, kind: HookKind) -> bool {
        self.hooks.iter().any(|(registered, _)| *registered == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Runs the hooks of `kind` in order, stopping at the first error.
    pub async fn run(&self, context: HookContext) -> Result<()> {
        for (kind, hook) in &self.hooks {
            if *kind == context.kind {
                hook(context.clone()).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relq_core::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context(kind: HookKind) -> HookContext {
        HookContext {
            table: "users".into(),
            kind,
            rows: Arc::from(Vec::new()),
            data: None,
        }
    }

    #[test]
    fn kinds_are_named() {
        assert_eq!(HookKind::ALL.len(), 9);
        assert_eq!(HookKind::AfterUpdateCommit.name(), "after_update_commit");
        assert!(HookKind::AfterDeleteCommit.is_commit());
        assert!(!HookKind::AfterDelete.is_commit());
    }

    #[tokio::test]
    async fn runs_matching_hooks_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (first, second) = (calls.clone(), calls.clone());
        let hooks = Hooks::new()
            .after_create(move |_| {
                let calls = first.clone();
                async move {
                    assert_eq!(calls.fetch_add(1, Ordering::SeqCst), 0);
                    Ok(())
                }
            })
            .after_create(move |_| {
                let calls = second.clone();
                async move {
                    assert_eq!(calls.fetch_add(1, Ordering::SeqCst), 1);
                    Ok(())
                }
            })
            .before_delete(|_| async { Err(Error::Hook("nope".into())) });

        hooks.run(context(HookKind::AfterCreate)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        hooks.run(context(HookKind::AfterUpdate)).await.unwrap();
        assert!(matches!(
            hooks.run(context(HookKind::BeforeDelete)).await,
            Err(Error::Hook(_))
        ));
        assert!(hooks.has(HookKind::BeforeDelete));
        assert!(!hooks.has(HookKind::BeforeCreate));
    }
}

//! Catalog-driven calls: encode arguments, evaluate, decode the result.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use scalarpool_core::catalog::{Catalog, Function, Literal, TypedLiteral};
use scalarpool_core::{EvalError, Result};

use crate::evaluator::{Evaluator, PendingScalar};

#[derive(Clone)]
pub struct FunctionHandler {
    evaluator: Evaluator,
    catalog: Arc<Catalog>,
}

impl FunctionHandler {
    pub fn new(evaluator: Evaluator, catalog: Catalog) -> Self {
        Self {
            evaluator,
            catalog: Arc::new(catalog),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Queue a call to the catalog function `name`.
    ///
    /// Unknown functions and badly typed arguments are rejected here, before
    /// anything is queued.
    pub fn call(&self, name: &str, args: &[Literal]) -> Result<PendingCall> {
        let function = self.catalog.lookup(name)?.clone();
        let expression = function.expression(args)?;
        Ok(PendingCall {
            scalar: self.evaluator.evaluate(expression),
            function,
        })
    }

    /// Callback form of [`FunctionHandler::call`].
    pub fn call_with<F>(&self, name: &str, args: &[Literal], on_result: F) -> Result<()>
    where
        F: FnOnce(std::result::Result<TypedLiteral, EvalError>) + Send + 'static,
    {
        let function = self.catalog.lookup(name)?.clone();
        let expression = function.expression(args)?;
        self.evaluator.evaluate_with(expression, move |value| {
            on_result(value.and_then(|v| function.decode(&v)));
        });
        Ok(())
    }
}

/// Future returned by [`FunctionHandler::call`].
pub struct PendingCall {
    scalar: PendingScalar,
    function: Function,
}

impl Future for PendingCall {
    type Output = std::result::Result<TypedLiteral, EvalError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        Pin::new(&mut this.scalar)
            .poll(cx)
            .map(|value| value.and_then(|v| this.function.decode(&v)))
    }
}

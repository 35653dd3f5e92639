//! Embedding entry point (C10): parses a FlowQuery source string once, then
//! runs it to completion, collecting whatever rows its terminal operation
//! published.

use flowquery_parser::Operation;

use crate::error::FlowQueryError;
use crate::exec::{self, Row};

pub struct Runner {
    operations: Vec<Operation>,
    results: Vec<Row>,
}

impl Runner {
    /// Parses `source` immediately so that a syntax error surfaces before
    /// any execution work begins, rather than mid-run.
    pub fn new(source: &str) -> Result<Self, FlowQueryError> {
        let operations = flowquery_parser::parse(source)?;
        Ok(Self {
            operations,
            results: Vec::new(),
        })
    }

    pub async fn run(&mut self) -> Result<(), FlowQueryError> {
        self.results = exec::execute(self.operations.clone()).await?;
        Ok(())
    }

    pub fn results(&self) -> &[Row] {
        &self.results
    }
}

use crate::aggregation::stages::Stage;
use crate::collection::{Collection, Document};
use crate::common::CancellationToken;
use crate::engine::Dolomite;
use crate::errors::{DolomiteError, DolomiteResult, ErrorKind};

/// A lazily evaluated stream of documents flowing between pipeline stages.
pub type DocumentStream = Box<dyn Iterator<Item = DolomiteResult<Document>>>;

/// Execution context handed to pipeline stages.
///
/// Cross-collection stages (`$lookup`, `$out`, `$merge`) resolve their
/// target collections through the engine handle; the cancellation token is
/// checked at stage boundaries and between documents.
#[derive(Clone)]
pub(crate) struct StageContext {
    pub engine: Option<Dolomite>,
    pub database: String,
    pub cancel: CancellationToken,
}

impl StageContext {
    pub(crate) fn collection(&self, name: &str) -> DolomiteResult<Collection> {
        let engine = self.engine.as_ref().ok_or_else(|| {
            DolomiteError::new(
                "cross-collection stages require a database context",
                ErrorKind::IllegalOperation,
            )
        })?;
        engine.collection_in(&self.database, name)
    }
}

/// A parsed aggregation pipeline.
#[derive(Debug)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Parses a sequence of stage documents.
    ///
    /// `$out` and `$merge` are only valid as the final stage.
    pub fn new(stages: &[Document]) -> DolomiteResult<Pipeline> {
        let parsed = stages
            .iter()
            .map(Stage::parse)
            .collect::<DolomiteResult<Vec<_>>>()?;
        for (position, stage) in parsed.iter().enumerate() {
            if stage.is_terminal() && position + 1 != parsed.len() {
                return Err(DolomiteError::new(
                    "$out can only be the final stage in the pipeline",
                    ErrorKind::Location(40601),
                ));
            }
        }
        Ok(Pipeline { stages: parsed })
    }

    /// Wires the pipeline onto a source stream and returns the output
    /// stream. Blocking stages consume their input when the stream reaches
    /// them; streaming stages stay lazy.
    pub(crate) fn execute(
        &self,
        source: DocumentStream,
        ctx: &StageContext,
    ) -> DolomiteResult<DocumentStream> {
        let mut stream = source;
        for stage in &self.stages {
            ctx.cancel.check()?;
            stream = checked(stage.execute(stream, ctx)?, ctx.cancel.clone());
        }
        Ok(stream)
    }

    /// Runs the pipeline to completion over a materialized source snapshot.
    pub(crate) fn run_to_vec(
        &self,
        source: Vec<Document>,
        ctx: &StageContext,
    ) -> DolomiteResult<Vec<Document>> {
        let stream = self.execute(Box::new(source.into_iter().map(Ok)), ctx)?;
        stream.collect()
    }
}

/// Wraps a stream with a per-document cancellation check.
fn checked(stream: DocumentStream, cancel: CancellationToken) -> DocumentStream {
    Box::new(stream.map(move |item| {
        cancel.check()?;
        item
    }))
}

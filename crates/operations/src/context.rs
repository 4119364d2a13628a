use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Everything an inference call needs beyond its prompt: which models to
/// use, who is asking, and the abort handle shared by the whole build so a
/// single cancel tears down an entire phase.
#[derive(Debug, Clone)]
pub struct InferenceContext {
    pub model: String,
    pub fast_model: String,
    pub user_id: Option<Uuid>,
    pub cancellation: CancellationToken,
}

impl InferenceContext {
    pub fn new(model: impl Into<String>, fast_model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            fast_model: fast_model.into(),
            user_id: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Child context sharing the same cancellation token; nested calls abort
    /// together with their parent.
    pub fn nested(&self) -> Self {
        self.clone()
    }
}

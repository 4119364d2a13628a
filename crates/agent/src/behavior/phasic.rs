//! The phasic build loop: PHASE_GENERATING → PHASE_IMPLEMENTING → … →
//! FINALIZING → REVIEWING, resumable at any point from persisted state.

use operations::{
    operations::{phase_generation, phase_implementation},
    schemas::{PhaseConcept, PhaseImplementationOutcome},
};
use serde_json::json;
use services::services::{file_manager::GeneratedFile, sandbox::SandboxFile};

use crate::{
    behavior::{AgentInfra, BuildError},
    state::DevState,
    ws::WsMessageType,
};

const FINALIZATION_PHASE_NAME: &str = "Finalization and Review";

pub async fn build(infra: &dyn AgentInfra) -> Result<(), BuildError> {
    let mut current_phase = choose_starting_phase(infra).await;
    infra.persist_state().await?;

    loop {
        let dev_state = infra.state().read().await.dev_state;
        match dev_state {
            DevState::PhaseGenerating => {
                current_phase = generate_next_phase(infra).await?;
            }
            DevState::PhaseImplementing => {
                let phase = match current_phase.take() {
                    Some(phase) => phase,
                    None => match infra.state().read().await.last_incomplete_phase() {
                        Some(phase) => phase.concept,
                        None => {
                            infra.state().write().await.dev_state = DevState::PhaseGenerating;
                            continue;
                        }
                    },
                };
                implement_phase(infra, phase).await?;
            }
            DevState::Finalizing => {
                finalize(infra).await?;
            }
            DevState::Reviewing => {
                review(infra).await?;
                break;
            }
            DevState::Idle => break,
        }
        infra.persist_state().await?;
    }
    Ok(())
}

/// Resume rules: an incomplete phase is re-implemented, a history of
/// completed phases asks for the next one, a fresh agent starts from the
/// blueprint's initial phase.
async fn choose_starting_phase(infra: &dyn AgentInfra) -> Option<PhaseConcept> {
    let mut state = infra.state().write().await;
    if let Some(phase) = state.last_incomplete_phase() {
        state.dev_state = DevState::PhaseImplementing;
        return Some(phase.concept);
    }
    if state.generated_phases.iter().any(|phase| phase.completed) {
        state.dev_state = DevState::PhaseGenerating;
        return None;
    }
    let initial = state
        .blueprint
        .as_ref()
        .and_then(|blueprint| blueprint.initial_phase.clone());
    match initial {
        Some(phase) => {
            state.append_phase(phase.clone());
            state.dev_state = DevState::PhaseImplementing;
            Some(phase)
        }
        None => {
            state.dev_state = DevState::PhaseGenerating;
            None
        }
    }
}

async fn generate_next_phase(
    infra: &dyn AgentInfra,
) -> Result<Option<PhaseConcept>, BuildError> {
    infra
        .ws()
        .broadcast(WsMessageType::PhaseGenerating, json!({}));

    let issues = infra.current_issues().await;
    let user_context = drain_user_context(infra).await;
    let (query, blueprint, completed) = {
        let state = infra.state().read().await;
        (
            state.query.clone(),
            state.blueprint.clone().unwrap_or_default(),
            state.completed_phase_names(),
        )
    };

    let next = phase_generation::generate(
        infra.inference(),
        &infra.inference_ctx(),
        &query,
        &blueprint,
        &completed,
        &issues,
        user_context.as_deref(),
    )
    .await?;

    match next {
        None => {
            infra.state().write().await.dev_state = DevState::Finalizing;
            Ok(None)
        }
        Some(concept) => {
            infra.state().write().await.append_phase(concept.clone());
            if !concept.install_commands.is_empty() {
                infra
                    .execute_commands(&concept.install_commands, true)
                    .await?;
            }
            infra.ws().broadcast(
                WsMessageType::PhaseGenerated,
                json!({ "phase": concept }),
            );
            infra.state().write().await.dev_state = DevState::PhaseImplementing;
            Ok(Some(concept))
        }
    }
}

async fn implement_phase(
    infra: &dyn AgentInfra,
    phase: PhaseConcept,
) -> Result<(), BuildError> {
    infra.ws().broadcast(
        WsMessageType::PhaseImplementing,
        json!({ "phase": phase.name }),
    );

    let outcome = run_implementation(infra, &phase).await?;
    let commit_message = format!("feat: {}\n\n{}", phase.name, phase.description);
    let saved = save_outcome(infra, &outcome, &commit_message).await?;

    if !outcome.deleted_files.is_empty() {
        infra
            .file_manager()
            .delete_files(&outcome.deleted_files)
            .await?;
        let removals: Vec<String> = outcome
            .deleted_files
            .iter()
            .map(|path| format!("rm -rf {path}"))
            .collect();
        infra.execute_commands(&removals, false).await?;
    }
    if !outcome.commands.is_empty() {
        // Commands returned by the implementation run without retries.
        infra.execute_commands(&outcome.commands, false).await?;
    }

    deploy_files(infra, &saved).await?;
    validate(infra).await?;

    let next_state = {
        let mut state = infra.state().write().await;
        state.mark_phase_complete(&phase.name);
        state.phases_counter = state.phases_counter.saturating_sub(1);
        infra.ws().broadcast(
            WsMessageType::PhaseImplemented,
            json!({ "phase": phase.name }),
        );
        if (phase.last_phase || state.phases_counter == 0)
            && state.pending_user_inputs.is_empty()
        {
            DevState::Finalizing
        } else {
            DevState::PhaseGenerating
        }
    };
    infra.state().write().await.dev_state = next_state;
    Ok(())
}

async fn run_implementation(
    infra: &dyn AgentInfra,
    phase: &PhaseConcept,
) -> Result<PhaseImplementationOutcome, BuildError> {
    let (redacted, do_not_touch) = match infra.deployment().await {
        Ok(deployment) => {
            let manifest = &deployment.template().manifest;
            (
                manifest.redacted_files.clone(),
                manifest.do_not_touch_files.clone(),
            )
        }
        Err(_) => (Vec::new(), Vec::new()),
    };
    let relevant_files = infra
        .file_manager()
        .get_relevant_files(&redacted, &do_not_touch)
        .await;
    let issues = infra.current_issues().await;

    let ws = infra.ws();
    let on_file_start = |path: &str, purpose: &str| {
        ws.broadcast(
            WsMessageType::FileGenerating,
            json!({ "file_path": path, "file_purpose": purpose }),
        );
    };
    let on_file_chunk = |path: &str, delta: &str| {
        ws.broadcast(
            WsMessageType::FileChunkGenerated,
            json!({ "file_path": path, "chunk": delta }),
        );
    };
    let on_file_complete = |file: &operations::schemas::GeneratedFileOutput| {
        ws.broadcast(
            WsMessageType::FileGenerated,
            json!({ "file_path": file.path }),
        );
    };

    Ok(phase_implementation::implement(
        infra.inference(),
        &infra.inference_ctx(),
        phase,
        &relevant_files,
        &issues,
        phase_implementation::FileCallbacks {
            on_file_start: &on_file_start,
            on_file_chunk: &on_file_chunk,
            on_file_complete: &on_file_complete,
        },
    )
    .await?)
}

async fn save_outcome(
    infra: &dyn AgentInfra,
    outcome: &PhaseImplementationOutcome,
    commit_message: &str,
) -> Result<Vec<SandboxFile>, BuildError> {
    if outcome.files.is_empty() {
        return Ok(Vec::new());
    }
    let generated: Vec<GeneratedFile> = outcome
        .files
        .iter()
        .map(|file| GeneratedFile {
            file_path: file.path.clone(),
            file_contents: file.contents.clone(),
            file_purpose: file.purpose.clone(),
        })
        .collect();
    let (states, _) = infra
        .file_manager()
        .save_files(&generated, commit_message)
        .await?;
    Ok(states
        .into_iter()
        .map(|state| SandboxFile::text(state.file_path, state.file_contents))
        .collect())
}

async fn deploy_files(
    infra: &dyn AgentInfra,
    files: &[SandboxFile],
) -> Result<(), BuildError> {
    infra
        .ws()
        .broadcast(WsMessageType::DeploymentStarted, json!({}));
    let deployment = infra.deployment().await?;
    match deployment
        .deploy_to_sandbox(files, false, None, true, None)
        .await
    {
        Ok(preview_url) => {
            infra.ws().broadcast(
                WsMessageType::DeploymentCompleted,
                json!({ "preview_url": preview_url }),
            );
        }
        Err(err) => {
            tracing::warn!("Sandbox deploy failed: {err}");
            infra.ws().broadcast(
                WsMessageType::DeploymentFailed,
                json!({ "message": err.to_string() }),
            );
        }
    }
    Ok(())
}

async fn validate(infra: &dyn AgentInfra) -> Result<(), BuildError> {
    infra
        .ws()
        .broadcast(WsMessageType::PhaseValidating, json!({}));
    infra.deterministic_code_fixes().await?;
    if infra.fast_fixes_enabled().await {
        infra.fast_smart_fixes().await?;
    }
    infra
        .ws()
        .broadcast(WsMessageType::PhaseValidated, json!({}));
    Ok(())
}

/// Runs at most once per agent, gated by `mvp_generated`.
async fn finalize(infra: &dyn AgentInfra) -> Result<(), BuildError> {
    {
        let mut state = infra.state().write().await;
        if state.mvp_generated {
            state.dev_state = DevState::Reviewing;
            return Ok(());
        }
        state.mvp_generated = true;
    }

    let phase = PhaseConcept {
        name: FINALIZATION_PHASE_NAME.to_string(),
        description: "Final pass: resolve outstanding issues and polish the app".to_string(),
        last_phase: true,
        files: Vec::new(),
        install_commands: Vec::new(),
    };
    infra.state().write().await.append_phase(phase.clone());
    infra.ws().broadcast(
        WsMessageType::PhaseImplementing,
        json!({ "phase": phase.name }),
    );

    let outcome = run_implementation(infra, &phase).await?;
    let commit_message = format!("feat: {FINALIZATION_PHASE_NAME}\n\n{}", phase.description);
    let saved = save_outcome(infra, &outcome, &commit_message).await?;
    deploy_files(infra, &saved).await?;

    {
        let mut state = infra.state().write().await;
        state.mark_phase_complete(FINALIZATION_PHASE_NAME);
        state.dev_state = DevState::Reviewing;
    }
    infra.ws().broadcast(
        WsMessageType::PhaseImplemented,
        json!({ "phase": FINALIZATION_PHASE_NAME }),
    );
    Ok(())
}

/// Runs at most once per agent, gated by `reviewing_initiated`. Outstanding
/// runtime or typecheck issues produce an assistant message suggesting a
/// deep-debug session.
async fn review(infra: &dyn AgentInfra) -> Result<(), BuildError> {
    {
        let mut state = infra.state().write().await;
        if state.reviewing_initiated {
            state.dev_state = DevState::Idle;
            return Ok(());
        }
        state.reviewing_initiated = true;
    }

    let issues = infra.current_issues().await;
    let needs_debugging = !issues.runtime_errors.is_empty()
        || !issues.static_analysis.typecheck.issues.is_empty();
    if needs_debugging {
        let message = format!(
            "The app builds but some issues remain:\n{}\nLaunch a deep_debug session to investigate and fix them.",
            issues.render()
        );
        infra.push_assistant_message(&message).await?;
    }

    infra.state().write().await.dev_state = DevState::Idle;
    Ok(())
}

async fn drain_user_context(infra: &dyn AgentInfra) -> Option<String> {
    let inputs = {
        let mut state = infra.state().write().await;
        std::mem::take(&mut state.pending_user_inputs)
    };
    let images = infra.take_pending_images();
    if inputs.is_empty() && images.is_empty() {
        return None;
    }
    let mut context = String::new();
    for input in &inputs {
        context.push_str(&format!("- {input}\n"));
    }
    if !images.is_empty() {
        context.push_str(&format!(
            "The user attached {} image(s): {}\n",
            images.len(),
            images
                .iter()
                .map(|image| image.filename.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    Some(context)
}

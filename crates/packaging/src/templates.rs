use microhost_models::OrchestratorError;
use rust_embed::RustEmbed;

pub const DOCKERFILE: &str = "Dockerfile";
pub const WRAPPER: &str = "server.py";
/// Module the wrapper imports `microservicio` from.
pub const ENTRYPOINT: &str = "app.py";

#[derive(RustEmbed)]
#[folder = "templates/"]
struct TemplateAssets;

/// Get embedded template file content
pub fn template(name: &str) -> Result<Vec<u8>, OrchestratorError> {
    TemplateAssets::get(name)
        .map(|file| file.data.into_owned())
        .ok_or_else(|| OrchestratorError::internal(format!("template not found: {name}")))
}

/// Files written next to the sources when no Dockerfile override is given.
pub fn default_context_files() -> Result<Vec<(&'static str, Vec<u8>)>, OrchestratorError> {
    Ok(vec![
        (DOCKERFILE, template(DOCKERFILE)?),
        (WRAPPER, template(WRAPPER)?),
    ])
}

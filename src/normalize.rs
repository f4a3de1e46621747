use crate::application::ApplicationSpec;

/// Return a copy of `spec` where a tool-specific source block holding only
/// zero values is dropped, turning the source back into a bare Git source.
///
/// The operation is idempotent.
pub fn normalize_application_spec(spec: &ApplicationSpec) -> ApplicationSpec {
    let mut spec = spec.clone();
    if spec.source.tool.as_ref().is_some_and(|tool| tool.is_zero()) {
        spec.source.tool = None;
    }
    spec
}

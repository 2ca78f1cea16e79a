//! Phase instructions sent alongside the context bundle.
//!
//! Each instruction names the JSON shape the response must follow; parsing in
//! `schema` enforces the same shape.

use hookline_core::Phase;

const AVATAR: &str = "Using the product information in the context, describe the target customer. \
Respond with a single JSON object.";

const JOURNEY: &str = "Using the product information and customer profile in the context, map the \
customer's buying journey. Respond with a single JSON object.";

const OBJECTIONS: &str = "Using the context, list the objections the customer raises before buying. \
Respond with JSON: {\"objections\": [...]}.";

const ANGLES: &str = "Using the context, propose marketing angles. Respond with JSON: \
{\"positive_angles\": [{\"number\", \"category\", \"concept\"}], \
\"negative_angles\": [{\"number\", \"category\", \"concept\"}]}.";

const HOOKS: &str = "Write hooks for the angle named in the `target` section of the context. \
Respond with JSON: {\"angle_id\", \"hooks_by_category\": {\"<category>\": [{\"hook_id\", \"hook_text\"}]}}.";

const SCRIPTS: &str = "Write scripts for the hook named in the `target` section of the context. \
Respond with JSON: {\"angle_id\", \"hooks\": [{\"hook_id\", \"scripts\": [{\"script_id\", \"content\", \"cta\"}]}]}.";

pub fn phase_instructions(phase: Phase) -> &'static str {
    match phase {
        Phase::Avatar => AVATAR,
        Phase::Journey => JOURNEY,
        Phase::Objections => OBJECTIONS,
        Phase::Angles => ANGLES,
        Phase::Hooks => HOOKS,
        Phase::Scripts => SCRIPTS,
    }
}

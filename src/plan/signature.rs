//! `makeSignature` (§3.4): `"<planId>|<mode>|<keyedVarsJson>"`.

use super::args::Variables;
use super::{Plan, SignatureMode};
use serde_json_bytes::{ByteString, Map as JsonMap, Value as JsonValue};

pub fn make_signature(plan: &Plan, mode: SignatureMode, vars: &Variables) -> String {
    let mask = match mode {
        SignatureMode::Strict => &plan.var_mask_strict,
        SignatureMode::Canonical => &plan.var_mask_canonical,
    };
    let mut map = JsonMap::new();
    for name in mask {
        let value = vars.get(name).cloned().unwrap_or(JsonValue::Null);
        map.insert(ByteString::from(name.clone()), value);
    }
    let mode_text = match mode {
        SignatureMode::Strict => "strict",
        SignatureMode::Canonical => "canonical",
    };
    format!("{}|{}|{}", plan.id, mode_text, JsonValue::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::compiler::PlanCompiler;

    #[test]
    fn signature_is_deterministic_for_same_inputs() {
        let compiler = PlanCompiler::new();
        let plan = compiler
            .compile("query Q($id: ID!) { user(id: $id) { id } }", None)
            .unwrap();
        let mut vars = Variables::new();
        vars.insert("id".to_string(), JsonValue::String("u1".into()));
        let a = plan.make_signature(SignatureMode::Strict, &vars);
        let b = plan.make_signature(SignatureMode::Strict, &vars);
        assert_eq!(a, b);
    }

    #[test]
    fn canonical_signature_omits_pagination_vars() {
        let compiler = PlanCompiler::new();
        let plan = compiler
            .compile(
                "query Q($n: Int, $c: String) { users(first: $n, after: $c) @connection { edges { cursor } } }",
                None,
            )
            .unwrap();
        let mut vars = Variables::new();
        vars.insert("n".to_string(), JsonValue::Number(10.into()));
        vars.insert("c".to_string(), JsonValue::Null);
        let strict = plan.make_signature(SignatureMode::Strict, &vars);
        let canonical = plan.make_signature(SignatureMode::Canonical, &vars);
        assert_ne!(strict, canonical);
        assert!(canonical.ends_with("{}"));
    }
}

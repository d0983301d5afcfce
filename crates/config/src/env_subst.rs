/// Expand `${VAR}` and `${VAR:-fallback}` placeholders in raw config text.
///
/// Unset variables without a fallback are left untouched so the parser
/// reports them in context.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

fn substitute_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated, copy the remainder verbatim.
            out.push_str(&rest[start..]);
            return out;
        };

        let expr = &after[..end];
        let (name, fallback) = match expr.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (expr, None),
        };

        match (name.is_empty(), lookup(name), fallback) {
            (false, Some(value), _) => out.push_str(&value),
            (false, None, Some(fallback)) => out.push_str(fallback),
            _ => {
                out.push_str("${");
                out.push_str(expr);
                out.push('}');
            },
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake(name: &str) -> Option<String> {
        (name == "PIPEDECK_PORT").then(|| "9100".to_string())
    }

    #[test]
    fn substitutes_known_var() {
        assert_eq!(substitute_with("port = ${PIPEDECK_PORT}", fake), "port = 9100");
    }

    #[test]
    fn uses_fallback_for_unset_var() {
        assert_eq!(
            substitute_with("bind = \"${PIPEDECK_BIND:-0.0.0.0}\"", fake),
            "bind = \"0.0.0.0\""
        );
    }

    #[test]
    fn set_var_wins_over_fallback() {
        assert_eq!(substitute_with("${PIPEDECK_PORT:-1}", fake), "9100");
    }

    #[test]
    fn leaves_unknown_and_malformed() {
        assert_eq!(substitute_with("${NOPE}", fake), "${NOPE}");
        assert_eq!(substitute_with("${}", fake), "${}");
        assert_eq!(substitute_with("a ${OPEN", fake), "a ${OPEN");
    }

    #[test]
    fn reads_process_env() {
        assert_eq!(substitute_env("plain text"), "plain text");
        assert_eq!(
            substitute_env("${PIPEDECK_SURELY_UNSET_VAR_XYZ:-dflt}"),
            "dflt"
        );
    }
}

//! Search filter construction.

/// OID of `LDAP_MATCHING_RULE_IN_CHAIN`, evaluating nested groups server-side.
pub const MATCHING_RULE_IN_CHAIN: &str = "1.2.840.113556.1.4.1941";

/// Escape a value for use inside a search filter.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '*' => out.push_str(r"\2a"),
            '(' => out.push_str(r"\28"),
            ')' => out.push_str(r"\29"),
            '\\' => out.push_str(r"\5c"),
            '\0' => out.push_str(r"\00"),
            c => out.push(c),
        }
    }
    out
}

/// `(&(objectclass=<class>)(<id_attr>=<uid>))`
pub fn user_filter(user_class: &str, id_attr: &str, uid: &str) -> String {
    format!(
        "(&(objectclass={})({id_attr}={}))",
        escape(user_class),
        escape(uid)
    )
}

/// User filter narrowed to (transitive) members of `group`.
pub fn chained_filter(
    user_class: &str,
    id_attr: &str,
    uid: &str,
    groups_attr: &str,
    group: &str,
) -> String {
    format!(
        "(&(objectclass={})({id_attr}={})({groups_attr}:{MATCHING_RULE_IN_CHAIN}:={}))",
        escape(user_class),
        escape(uid),
        escape(group)
    )
}

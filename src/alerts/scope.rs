/// Resolves the rule scopes that apply to a repository key: the exact repo
/// scope first, then the owning org's scope when the key has an owner
/// segment. The list is ordered and deduplicated so evaluation stays
/// scope-agnostic if the hierarchy ever grows.
pub fn resolve_scopes(repo_key: &str) -> Vec<String> {
    let mut scopes = vec![format!("repo:{repo_key}")];

    if let Some((owner, _)) = repo_key.split_once('/') {
        if !owner.is_empty() {
            let org_scope = format!("org:{owner}");
            if !scopes.contains(&org_scope) {
                scopes.push(org_scope);
            }
        }
    }

    scopes
}

//! In-memory GitLab for tests: call counters, failure injection and scripted progressions.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as Json;
use tanuki_core::{TanukiError, TanukiResult};

use crate::models::*;
use crate::GitlabApi;

const MARKED_FOR_DELETION_AT: &str = "2026-01-01";

type RefKey = (i64, String);

struct State {
    next_id: i64,
    user: User,
    settings: Settings,
    groups: BTreeMap<i64, Group>,
    projects: BTreeMap<i64, Project>,
    import_scripts: BTreeMap<i64, VecDeque<String>>,
    deleting: BTreeMap<i64, usize>,
    branches: BTreeMap<RefKey, Branch>,
    hidden_branches: BTreeMap<RefKey, usize>,
    unprotected_reads: BTreeMap<RefKey, usize>,
    protected_branches: BTreeMap<RefKey, ProtectedBranch>,
    protected_branch_reads: BTreeMap<RefKey, VecDeque<Option<ProtectedBranch>>>,
    protected_tags: BTreeMap<RefKey, ProtectedTag>,
    project_members: BTreeMap<(i64, i64), Member>,
    group_members: BTreeMap<(i64, i64), Member>,
    failures: BTreeMap<&'static str, VecDeque<TanukiError>>,
    calls: BTreeMap<&'static str, usize>,
    import_progression: Vec<String>,
    delete_reads: usize,
    soft_delete: bool,
    branch_visible_after: usize,
    default_protection_after: usize,
    code_owner_supported: bool,
    reject_auth: bool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            next_id: 1,
            user: User { id: 1, username: "root".into(), name: "Administrator".into() },
            settings: Settings { default_branch_protection: 2 },
            groups: BTreeMap::new(),
            projects: BTreeMap::new(),
            import_scripts: BTreeMap::new(),
            deleting: BTreeMap::new(),
            branches: BTreeMap::new(),
            hidden_branches: BTreeMap::new(),
            unprotected_reads: BTreeMap::new(),
            protected_branches: BTreeMap::new(),
            protected_branch_reads: BTreeMap::new(),
            protected_tags: BTreeMap::new(),
            project_members: BTreeMap::new(),
            group_members: BTreeMap::new(),
            failures: BTreeMap::new(),
            calls: BTreeMap::new(),
            import_progression: vec!["scheduled".into(), "started".into(), "finished".into()],
            delete_reads: 0,
            soft_delete: false,
            branch_visible_after: 0,
            default_protection_after: 0,
            code_owner_supported: true,
            reject_auth: false,
        }
    }
}

fn http(status: u16, message: impl Into<String>) -> TanukiError { TanukiError::transport(Some(status), message) }

fn slug(name: &str) -> String {
    name.trim().to_ascii_lowercase().chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '.' { c } else { '-' }).collect()
}

/// Merge the serialized (present) fields of `patch` into `target`.
fn overlay<T: Serialize + DeserializeOwned, P: Serialize>(target: &mut T, patch: &P) -> TanukiResult<()> {
    let bad = |e: serde_json::Error| http(400, format!("invalid parameters: {}", e));
    let mut base = serde_json::to_value(&*target).map_err(bad)?;
    if let (Some(obj), Json::Object(fields)) = (base.as_object_mut(), serde_json::to_value(patch).map_err(bad)?) {
        obj.extend(fields);
    }
    *target = serde_json::from_value(base).map_err(bad)?;
    Ok(())
}

impl State {
    fn project_id(&self, project: &str) -> TanukiResult<i64> {
        let found = match project.parse::<i64>() {
            Ok(id) => self.projects.contains_key(&id).then_some(id),
            Err(_) => self.projects.values().find(|p| p.path_with_namespace == project).map(|p| p.id),
        };
        found.ok_or_else(|| TanukiError::not_found(format!("project {}", project)))
    }

    fn group_id(&self, group: &str) -> TanukiResult<i64> {
        let found = match group.parse::<i64>() {
            Ok(id) => self.groups.contains_key(&id).then_some(id),
            Err(_) => self.groups.values().find(|g| g.full_path == group).map(|g| g.id),
        };
        found.ok_or_else(|| TanukiError::not_found(format!("group {}", group)))
    }

    fn bump(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn default_protection_for(&self, ns: &Namespace) -> i32 {
        match ns.is_group().then(|| self.groups.get(&ns.id)).flatten() {
            Some(g) => g.default_branch_protection,
            None => self.settings.default_branch_protection,
        }
    }

    /// Create the default branch of a freshly initialized project; protection lands asynchronously.
    fn init_default_branch(&mut self, project_id: i64) {
        let Some(p) = self.projects.get(&project_id) else { return };
        let Some(name) = p.default_branch.clone() else { return };
        let protection = self.default_protection_for(&p.namespace);
        let web_url = format!("{}/-/tree/{}", p.web_url, name);
        let key = (project_id, name.clone());
        let sha = format!("{:040x}", project_id);
        self.branches.insert(key.clone(), Branch {
            name,
            default: true,
            can_push: true,
            web_url,
            commit: Some(Commit { short_id: sha[..8].to_string(), id: sha, title: "Initial commit".into() }),
            ..Default::default()
        });
        if protection != 0 {
            self.unprotected_reads.insert(key, self.default_protection_after);
        }
    }

    fn forget_project(&mut self, id: i64) {
        self.projects.remove(&id);
        self.deleting.remove(&id);
        self.import_scripts.remove(&id);
        self.branches.retain(|(p, _), _| *p != id);
        self.protected_branches.retain(|(p, _), _| *p != id);
        self.protected_tags.retain(|(p, _), _| *p != id);
        self.project_members.retain(|(p, _), _| *p != id);
    }

    fn new_member(&self, opts: &AddMemberOptions) -> Member {
        Member {
            id: opts.user_id,
            username: format!("user{}", opts.user_id),
            name: format!("User {}", opts.user_id),
            state: "active".into(),
            access_level: opts.access_level,
            expires_at: opts.expires_at.clone().filter(|s| !s.is_empty()),
        }
    }
}

fn edit_member(member: &mut Member, opts: &EditMemberOptions) {
    if let Some(level) = opts.access_level { member.access_level = level; }
    if let Some(exp) = &opts.expires_at { member.expires_at = Some(exp.clone()).filter(|s| !s.is_empty()); }
}

/// In-memory stand-in for a GitLab instance.
#[derive(Default)]
pub struct MockGitlab {
    state: Mutex<State>,
}

impl MockGitlab {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, State> { self.state.lock().unwrap_or_else(|e| e.into_inner()) }

    fn enter(&self, method: &'static str) -> TanukiResult<MutexGuard<'_, State>> {
        let mut st = self.lock();
        *st.calls.entry(method).or_default() += 1;
        if let Some(err) = st.failures.get_mut(method).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(st)
    }

    // ----------------- knobs -----------------

    /// Statuses served by successive `import_status` calls for projects created with an import url.
    pub fn set_import_progression(&self, statuses: &[&str]) {
        self.lock().import_progression = statuses.iter().map(|s| s.to_string()).collect();
    }

    /// Number of `get_project` reads that still see a project after `delete_project`.
    pub fn set_delete_reads(&self, reads: usize) { self.lock().delete_reads = reads; }

    /// Deleted projects stay readable with `marked_for_deletion_at` set (GitLab EE delayed deletion).
    pub fn set_soft_delete(&self, on: bool) { self.lock().soft_delete = on; }

    pub fn set_branch_visible_after(&self, reads: usize) { self.lock().branch_visible_after = reads; }

    pub fn set_default_protection_after(&self, reads: usize) { self.lock().default_protection_after = reads; }

    pub fn set_code_owner_supported(&self, on: bool) { self.lock().code_owner_supported = on; }

    pub fn set_instance_default_branch_protection(&self, level: i32) { self.lock().settings.default_branch_protection = level; }

    pub fn set_reject_auth(&self, on: bool) { self.lock().reject_auth = on; }

    /// Fail the next call of `method` with `err`. Queued failures are consumed in order.
    pub fn fail_next(&self, method: &'static str, err: TanukiError) {
        self.lock().failures.entry(method).or_default().push_back(err);
    }

    /// Serve these results to the next `get_protected_branch` calls before the stored state.
    pub fn script_protected_branch_reads(&self, project_id: i64, branch: &str, reads: Vec<Option<ProtectedBranch>>) {
        self.lock().protected_branch_reads.insert((project_id, branch.to_string()), reads.into());
    }

    // ----------------- seeding -----------------

    pub fn add_group(&self, full_path: &str, default_branch_protection: i32) -> Group {
        let mut st = self.lock();
        let id = st.bump();
        let g = Group { id, full_path: full_path.to_string(), default_branch_protection };
        st.groups.insert(id, g.clone());
        g
    }

    /// Insert an initialized project with its default branch already protected.
    pub fn seed_project(&self, name: &str, default_branch: &str) -> Project {
        let mut st = self.lock();
        let id = st.bump();
        let user = st.user.clone();
        let path = slug(name);
        let pwn = format!("{}/{}", user.username, path);
        let p = Project {
            id,
            name: name.to_string(),
            path,
            web_url: format!("https://gitlab.example.com/{}", pwn),
            path_with_namespace: pwn,
            default_branch: Some(default_branch.to_string()),
            visibility: Some("private".into()),
            namespace: Namespace { id: user.id, name: user.name, path: user.username.clone(), kind: "user".into(), full_path: user.username },
            import_status: Some("none".into()),
            ..Default::default()
        };
        st.projects.insert(id, p.clone());
        st.init_default_branch(id);
        let key = (id, default_branch.to_string());
        st.unprotected_reads.remove(&key);
        if let Some(b) = st.branches.get_mut(&key) { b.protected = true; }
        let pb_id = st.bump();
        st.protected_branches.insert(key, ProtectedBranch {
            id: pb_id,
            name: default_branch.to_string(),
            push_access_levels: vec![AccessDescription { access_level: 40, access_level_description: "Maintainers".into(), ..Default::default() }],
            merge_access_levels: vec![AccessDescription { access_level: 40, access_level_description: "Maintainers".into(), ..Default::default() }],
            ..Default::default()
        });
        p
    }

    pub fn seed_branch(&self, project_id: i64, name: &str) {
        self.lock().branches.insert((project_id, name.to_string()), Branch { name: name.to_string(), can_push: true, ..Default::default() });
    }

    pub fn seed_protected_branch(&self, project_id: i64, pb: ProtectedBranch) {
        self.lock().protected_branches.insert((project_id, pb.name.clone()), pb);
    }

    pub fn seed_protected_tag(&self, project_id: i64, pt: ProtectedTag) {
        self.lock().protected_tags.insert((project_id, pt.name.clone()), pt);
    }

    pub fn seed_project_member(&self, project_id: i64, m: Member) { self.lock().project_members.insert((project_id, m.id), m); }

    pub fn seed_group_member(&self, group_id: i64, m: Member) { self.lock().group_members.insert((group_id, m.id), m); }

    // ----------------- inspection -----------------

    pub fn calls(&self, method: &str) -> usize { self.lock().calls.get(method).copied().unwrap_or(0) }

    pub fn total_calls(&self) -> usize { self.lock().calls.values().sum() }

    pub fn reset_calls(&self) { self.lock().calls.clear(); }

    pub fn project(&self, id: i64) -> Option<Project> { self.lock().projects.get(&id).cloned() }

    pub fn branch(&self, project_id: i64, name: &str) -> Option<Branch> { self.lock().branches.get(&(project_id, name.to_string())).cloned() }

    pub fn protected_branch(&self, project_id: i64, name: &str) -> Option<ProtectedBranch> {
        self.lock().protected_branches.get(&(project_id, name.to_string())).cloned()
    }

    pub fn protected_tag(&self, project_id: i64, name: &str) -> Option<ProtectedTag> {
        self.lock().protected_tags.get(&(project_id, name.to_string())).cloned()
    }

    pub fn project_member(&self, project_id: i64, user_id: i64) -> Option<Member> { self.lock().project_members.get(&(project_id, user_id)).cloned() }

    pub fn group_member(&self, group_id: i64, user_id: i64) -> Option<Member> { self.lock().group_members.get(&(group_id, user_id)).cloned() }
}

#[async_trait::async_trait]
impl GitlabApi for MockGitlab {
    async fn current_user(&self) -> TanukiResult<User> {
        let st = self.enter("current_user")?;
        if st.reject_auth {
            return Err(http(401, "401 Unauthorized"));
        }
        Ok(st.user.clone())
    }

    async fn get_settings(&self) -> TanukiResult<Settings> {
        Ok(self.enter("get_settings")?.settings.clone())
    }

    async fn get_group(&self, group: &str) -> TanukiResult<Group> {
        let st = self.enter("get_group")?;
        let id = st.group_id(group)?;
        Ok(st.groups[&id].clone())
    }

    async fn get_project(&self, project: &str) -> TanukiResult<Project> {
        let mut st = self.enter("get_project")?;
        let id = st.project_id(project)?;
        if let Some(left) = st.deleting.get_mut(&id) {
            if *left == 0 {
                st.forget_project(id);
                return Err(TanukiError::not_found(format!("project {}", project)));
            }
            *left -= 1;
        }
        Ok(st.projects[&id].clone())
    }

    async fn create_project(&self, opts: &CreateProjectOptions) -> TanukiResult<Project> {
        let mut st = self.enter("create_project")?;
        let name = opts.settings.name.clone().filter(|n| !n.trim().is_empty()).ok_or_else(|| http(400, "name is missing"))?;
        let path = opts.settings.path.clone().unwrap_or_else(|| slug(&name));
        let namespace = match opts.namespace_id {
            Some(ns) => {
                let g = st.groups.get(&ns).ok_or_else(|| TanukiError::not_found(format!("namespace {}", ns)))?;
                let short = g.full_path.rsplit('/').next().unwrap_or_default().to_string();
                Namespace { id: g.id, name: short.clone(), path: short, kind: "group".into(), full_path: g.full_path.clone() }
            }
            None => Namespace { id: st.user.id, name: st.user.name.clone(), path: st.user.username.clone(), kind: "user".into(), full_path: st.user.username.clone() },
        };
        let pwn = format!("{}/{}", namespace.full_path, path);
        if st.projects.values().any(|p| p.path_with_namespace == pwn) {
            return Err(http(400, format!("{{\"path\":[\"has already been taken\"]}} ({})", pwn)));
        }
        let id = st.bump();
        let mut p = Project {
            id,
            name,
            path,
            web_url: format!("https://gitlab.example.com/{}", pwn),
            http_url_to_repo: format!("https://gitlab.example.com/{}.git", pwn),
            ssh_url_to_repo: format!("git@gitlab.example.com:{}.git", pwn),
            path_with_namespace: pwn,
            visibility: Some("private".into()),
            namespace,
            import_status: Some("none".into()),
            ..Default::default()
        };
        let mut settings = opts.settings.clone();
        settings.default_branch = None;
        overlay(&mut p, &settings)?;

        let importing = opts.import_url.as_deref().is_some_and(|u| !u.is_empty());
        let initialized = importing || opts.initialize_with_readme == Some(true);
        if initialized {
            p.default_branch = Some(opts.settings.default_branch.clone().unwrap_or_else(|| "main".into()));
        }
        if importing {
            p.import_status = Some("scheduled".into());
            let script: VecDeque<String> = st.import_progression.iter().cloned().collect();
            st.import_scripts.insert(id, script);
        }
        st.projects.insert(id, p.clone());
        if initialized {
            st.init_default_branch(id);
        }
        Ok(p)
    }

    async fn edit_project(&self, project: &str, opts: &EditProjectOptions) -> TanukiResult<Project> {
        let mut st = self.enter("edit_project")?;
        let id = st.project_id(project)?;
        if let Some(branch) = &opts.default_branch {
            if !st.branches.contains_key(&(id, branch.clone())) {
                return Err(http(400, format!("Could not change HEAD: branch '{}' does not exist", branch)));
            }
        }
        let mut p = st.projects[&id].clone();
        overlay(&mut p, opts)?;
        st.projects.insert(id, p.clone());
        Ok(p)
    }

    async fn transfer_project(&self, project: &str, namespace_id: i64) -> TanukiResult<Project> {
        let mut st = self.enter("transfer_project")?;
        let id = st.project_id(project)?;
        let g = st.groups.get(&namespace_id).cloned().ok_or_else(|| TanukiError::not_found(format!("namespace {}", namespace_id)))?;
        let p = st.projects.get_mut(&id).ok_or_else(|| TanukiError::not_found(format!("project {}", project)))?;
        let short = g.full_path.rsplit('/').next().unwrap_or_default().to_string();
        p.namespace = Namespace { id: g.id, name: short.clone(), path: short, kind: "group".into(), full_path: g.full_path.clone() };
        p.path_with_namespace = format!("{}/{}", g.full_path, p.path);
        Ok(p.clone())
    }

    async fn archive_project(&self, project: &str) -> TanukiResult<Project> {
        let mut st = self.enter("archive_project")?;
        let id = st.project_id(project)?;
        let p = st.projects.get_mut(&id).ok_or_else(|| TanukiError::not_found(format!("project {}", project)))?;
        p.archived = true;
        Ok(p.clone())
    }

    async fn unarchive_project(&self, project: &str) -> TanukiResult<Project> {
        let mut st = self.enter("unarchive_project")?;
        let id = st.project_id(project)?;
        let p = st.projects.get_mut(&id).ok_or_else(|| TanukiError::not_found(format!("project {}", project)))?;
        p.archived = false;
        Ok(p.clone())
    }

    async fn delete_project(&self, project: &str) -> TanukiResult<()> {
        let mut st = self.enter("delete_project")?;
        let id = st.project_id(project)?;
        if st.soft_delete {
            if let Some(p) = st.projects.get_mut(&id) {
                p.marked_for_deletion_at = Some(MARKED_FOR_DELETION_AT.into());
            }
        } else {
            let reads = st.delete_reads;
            st.deleting.insert(id, reads);
        }
        Ok(())
    }

    async fn import_status(&self, project: &str) -> TanukiResult<ImportStatus> {
        let mut st = self.enter("import_status")?;
        let id = st.project_id(project)?;
        let status = match st.import_scripts.get_mut(&id) {
            Some(q) if q.len() > 1 => q.pop_front().unwrap_or_default(),
            Some(q) => q.front().cloned().unwrap_or_default(),
            None => st.projects[&id].import_status.clone().unwrap_or_else(|| "none".into()),
        };
        if let Some(p) = st.projects.get_mut(&id) {
            p.import_status = Some(status.clone());
        }
        let import_error = (status == "failed").then(|| "remote repository unreachable".to_string());
        Ok(ImportStatus { id, import_status: status, import_error })
    }

    async fn get_branch(&self, project: &str, branch: &str) -> TanukiResult<Branch> {
        let mut st = self.enter("get_branch")?;
        let id = st.project_id(project)?;
        let key = (id, branch.to_string());
        if let Some(left) = st.hidden_branches.get_mut(&key) {
            if *left > 0 {
                *left -= 1;
                return Err(TanukiError::not_found(format!("branch {}", branch)));
            }
            st.hidden_branches.remove(&key);
        }
        let apply_protection = match st.unprotected_reads.get_mut(&key) {
            Some(0) => true,
            Some(left) => {
                *left -= 1;
                false
            }
            None => false,
        };
        if apply_protection {
            st.unprotected_reads.remove(&key);
            if let Some(b) = st.branches.get_mut(&key) { b.protected = true; }
        }
        let protected = st.protected_branches.contains_key(&key);
        let mut b = st.branches.get(&key).cloned().ok_or_else(|| TanukiError::not_found(format!("branch {}", branch)))?;
        b.protected |= protected;
        Ok(b)
    }

    async fn create_branch(&self, project: &str, branch: &str, git_ref: &str) -> TanukiResult<Branch> {
        let mut st = self.enter("create_branch")?;
        let id = st.project_id(project)?;
        let key = (id, branch.to_string());
        if st.branches.contains_key(&key) {
            return Err(http(400, "Branch already exists"));
        }
        let source = st.branches.get(&(id, git_ref.to_string())).cloned().ok_or_else(|| http(400, "Invalid reference name"))?;
        let web_url = format!("{}/-/tree/{}", st.projects[&id].web_url, branch);
        let b = Branch { name: branch.to_string(), can_push: true, web_url, commit: source.commit, ..Default::default() };
        st.branches.insert(key.clone(), b.clone());
        let hidden = st.branch_visible_after;
        if hidden > 0 {
            st.hidden_branches.insert(key, hidden);
        }
        Ok(b)
    }

    async fn delete_branch(&self, project: &str, branch: &str) -> TanukiResult<()> {
        let mut st = self.enter("delete_branch")?;
        let id = st.project_id(project)?;
        if st.projects[&id].default_branch.as_deref() == Some(branch) {
            return Err(http(400, "The default branch of a project cannot be deleted."));
        }
        st.branches.remove(&(id, branch.to_string())).map(|_| ()).ok_or_else(|| TanukiError::not_found(format!("branch {}", branch)))
    }

    async fn get_protected_branch(&self, project: &str, branch: &str) -> TanukiResult<ProtectedBranch> {
        let mut st = self.enter("get_protected_branch")?;
        let id = st.project_id(project)?;
        let key = (id, branch.to_string());
        if let Some(read) = st.protected_branch_reads.get_mut(&key).and_then(VecDeque::pop_front) {
            return read.ok_or_else(|| TanukiError::not_found(format!("protected branch {}", branch)));
        }
        st.protected_branches.get(&key).cloned().ok_or_else(|| TanukiError::not_found(format!("protected branch {}", branch)))
    }

    async fn protect_branch(&self, project: &str, opts: &ProtectBranchOptions) -> TanukiResult<ProtectedBranch> {
        let mut st = self.enter("protect_branch")?;
        let id = st.project_id(project)?;
        let key = (id, opts.name.clone());
        if st.protected_branches.contains_key(&key) {
            return Err(http(409, format!("Protected branch '{}' already exists", opts.name)));
        }
        let rules = |level: Option<i32>, default: i32, users: &[BranchPermission]| -> Vec<AccessDescription> {
            let mut v = vec![AccessDescription::role(level.unwrap_or(default))];
            v.extend(users.iter().map(|u| AccessDescription { access_level: 40, user_id: u.user_id, group_id: u.group_id, ..Default::default() }));
            v
        };
        let pb = ProtectedBranch {
            id: st.bump(),
            name: opts.name.clone(),
            push_access_levels: rules(opts.push_access_level, 40, &opts.allowed_to_push),
            merge_access_levels: rules(opts.merge_access_level, 40, &opts.allowed_to_merge),
            unprotect_access_levels: opts.unprotect_access_level.map(|l| vec![AccessDescription::role(l)]).unwrap_or_default(),
            code_owner_approval_required: st.code_owner_supported && opts.code_owner_approval_required.unwrap_or(false),
            allow_force_push: opts.allow_force_push.unwrap_or(false),
        };
        st.protected_branches.insert(key.clone(), pb.clone());
        if let Some(b) = st.branches.get_mut(&key) { b.protected = true; }
        Ok(pb)
    }

    async fn unprotect_branch(&self, project: &str, branch: &str) -> TanukiResult<()> {
        let mut st = self.enter("unprotect_branch")?;
        let id = st.project_id(project)?;
        let key = (id, branch.to_string());
        st.protected_branches.remove(&key).ok_or_else(|| TanukiError::not_found(format!("protected branch {}", branch)))?;
        st.unprotected_reads.remove(&key);
        if let Some(b) = st.branches.get_mut(&key) { b.protected = false; }
        Ok(())
    }

    async fn require_code_owner_approvals(&self, project: &str, branch: &str, required: bool) -> TanukiResult<()> {
        let mut st = self.enter("require_code_owner_approvals")?;
        let id = st.project_id(project)?;
        if !st.code_owner_supported {
            return Err(TanukiError::not_found(format!("PATCH projects/{}/protected_branches/{}", project, branch)));
        }
        let pb = st.protected_branches.get_mut(&(id, branch.to_string())).ok_or_else(|| TanukiError::not_found(format!("protected branch {}", branch)))?;
        pb.code_owner_approval_required = required;
        Ok(())
    }

    async fn get_protected_tag(&self, project: &str, tag: &str) -> TanukiResult<ProtectedTag> {
        let st = self.enter("get_protected_tag")?;
        let id = st.project_id(project)?;
        st.protected_tags.get(&(id, tag.to_string())).cloned().ok_or_else(|| TanukiError::not_found(format!("protected tag {}", tag)))
    }

    async fn protect_tag(&self, project: &str, opts: &ProtectTagOptions) -> TanukiResult<ProtectedTag> {
        let mut st = self.enter("protect_tag")?;
        let id = st.project_id(project)?;
        let key = (id, opts.name.clone());
        if st.protected_tags.contains_key(&key) {
            return Err(http(409, format!("Protected tag '{}' already exists", opts.name)));
        }
        let pt = ProtectedTag { name: opts.name.clone(), create_access_levels: vec![AccessDescription::role(opts.create_access_level)] };
        st.protected_tags.insert(key, pt.clone());
        Ok(pt)
    }

    async fn unprotect_tag(&self, project: &str, tag: &str) -> TanukiResult<()> {
        let mut st = self.enter("unprotect_tag")?;
        let id = st.project_id(project)?;
        st.protected_tags.remove(&(id, tag.to_string())).map(|_| ()).ok_or_else(|| TanukiError::not_found(format!("protected tag {}", tag)))
    }

    async fn get_project_member(&self, project: &str, user_id: i64) -> TanukiResult<Member> {
        let st = self.enter("get_project_member")?;
        let id = st.project_id(project)?;
        st.project_members.get(&(id, user_id)).cloned().ok_or_else(|| TanukiError::not_found(format!("member {} of project {}", user_id, project)))
    }

    async fn add_project_member(&self, project: &str, opts: &AddMemberOptions) -> TanukiResult<Member> {
        let mut st = self.enter("add_project_member")?;
        let id = st.project_id(project)?;
        if st.project_members.contains_key(&(id, opts.user_id)) {
            return Err(http(409, "Member already exists"));
        }
        let m = st.new_member(opts);
        st.project_members.insert((id, opts.user_id), m.clone());
        Ok(m)
    }

    async fn edit_project_member(&self, project: &str, user_id: i64, opts: &EditMemberOptions) -> TanukiResult<Member> {
        let mut st = self.enter("edit_project_member")?;
        let id = st.project_id(project)?;
        let m = st.project_members.get_mut(&(id, user_id)).ok_or_else(|| TanukiError::not_found(format!("member {} of project {}", user_id, project)))?;
        edit_member(m, opts);
        Ok(m.clone())
    }

    async fn remove_project_member(&self, project: &str, user_id: i64) -> TanukiResult<()> {
        let mut st = self.enter("remove_project_member")?;
        let id = st.project_id(project)?;
        st.project_members.remove(&(id, user_id)).map(|_| ()).ok_or_else(|| TanukiError::not_found(format!("member {} of project {}", user_id, project)))
    }

    async fn get_group_member(&self, group: &str, user_id: i64) -> TanukiResult<Member> {
        let st = self.enter("get_group_member")?;
        let id = st.group_id(group)?;
        st.group_members.get(&(id, user_id)).cloned().ok_or_else(|| TanukiError::not_found(format!("member {} of group {}", user_id, group)))
    }

    async fn add_group_member(&self, group: &str, opts: &AddMemberOptions) -> TanukiResult<Member> {
        let mut st = self.enter("add_group_member")?;
        let id = st.group_id(group)?;
        if st.group_members.contains_key(&(id, opts.user_id)) {
            return Err(http(409, "Member already exists"));
        }
        let m = st.new_member(opts);
        st.group_members.insert((id, opts.user_id), m.clone());
        Ok(m)
    }

    async fn edit_group_member(&self, group: &str, user_id: i64, opts: &EditMemberOptions) -> TanukiResult<Member> {
        let mut st = self.enter("edit_group_member")?;
        let id = st.group_id(group)?;
        let m = st.group_members.get_mut(&(id, user_id)).ok_or_else(|| TanukiError::not_found(format!("member {} of group {}", user_id, group)))?;
        edit_member(m, opts);
        Ok(m.clone())
    }

    async fn remove_group_member(&self, group: &str, user_id: i64, _opts: &RemoveMemberOptions) -> TanukiResult<()> {
        let mut st = self.enter("remove_group_member")?;
        let id = st.group_id(group)?;
        st.group_members.remove(&(id, user_id)).map(|_| ()).ok_or_else(|| TanukiError::not_found(format!("member {} of group {}", user_id, group)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deletion_is_observed_after_scripted_reads() {
        let m = MockGitlab::new();
        m.set_delete_reads(2);
        let p = m.seed_project("svc", "main");
        m.delete_project(&p.id.to_string()).await.unwrap();
        assert!(m.get_project("1").await.is_ok());
        assert!(m.get_project("1").await.is_ok());
        assert!(m.get_project("1").await.unwrap_err().is_not_found());
        assert_eq!(m.calls("get_project"), 3);
        assert!(m.project(p.id).is_none());
    }

    #[tokio::test]
    async fn import_progression_repeats_its_last_state() {
        let m = MockGitlab::new();
        let p = m
            .create_project(&CreateProjectOptions {
                settings: EditProjectOptions { name: Some("Mirror".into()), ..Default::default() },
                import_url: Some("https://example.com/m.git".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(p.import_status.as_deref(), Some("scheduled"));
        let id = p.id.to_string();
        let seen: Vec<String> = {
            let mut v = Vec::new();
            for _ in 0..4 {
                v.push(m.import_status(&id).await.unwrap().import_status);
            }
            v
        };
        assert_eq!(seen, vec!["scheduled", "started", "finished", "finished"]);
        assert_eq!(m.project(p.id).unwrap().path_with_namespace, "root/mirror");
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let m = MockGitlab::new();
        m.fail_next("current_user", TanukiError::transport(Some(502), "bad gateway"));
        assert!(m.current_user().await.is_err());
        assert_eq!(m.current_user().await.unwrap().username, "root");
        assert_eq!(m.calls("current_user"), 2);
    }

    #[tokio::test]
    async fn default_branch_protection_lands_after_reads() {
        let m = MockGitlab::new();
        m.set_default_protection_after(1);
        let p = m
            .create_project(&CreateProjectOptions {
                settings: EditProjectOptions { name: Some("app".into()), ..Default::default() },
                initialize_with_readme: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        let id = p.id.to_string();
        assert!(!m.get_branch(&id, "main").await.unwrap().protected);
        assert!(m.get_branch(&id, "main").await.unwrap().protected);
    }
}

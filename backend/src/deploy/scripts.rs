//! Deployment artifact generation
//!
//! `deploy.sh`, `rollback.sh` and the CI workflow are pure functions of the
//! application, the server and the set of template kinds found under the
//! application path, so regenerating them for unchanged inputs yields the
//! same bytes and the artifact commit becomes a no-op.

use crate::models::application::Application;
use crate::models::server::ServerProfile;
use crate::utils::{sha256_hash, shell_quote};

pub const DEPLOY_SCRIPT: &str = "deploy.sh";
pub const ROLLBACK_SCRIPT: &str = "rollback.sh";
pub const WORKFLOW_DIR: &str = ".github/workflows";

/// Template kinds present under an application path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectedKinds {
    pub terraform: bool,
    pub ansible: bool,
    pub bash: bool,
}

impl DetectedKinds {
    /// Classify relative file paths
    pub fn from_paths<S: AsRef<str>>(paths: &[S]) -> Self {
        let mut kinds = DetectedKinds::default();
        for path in paths {
            let path = path.as_ref();
            let name = path.rsplit('/').next().unwrap_or(path);
            if name.ends_with(".tf") {
                kinds.terraform = true;
            } else if (name.ends_with(".yml") || name.ends_with(".yaml")) && !is_ci_file(path) {
                kinds.ansible = true;
            } else if name.ends_with(".sh") && name != DEPLOY_SCRIPT && name != ROLLBACK_SCRIPT {
                kinds.bash = true;
            }
        }
        kinds
    }

    pub fn is_empty(&self) -> bool {
        !(self.terraform || self.ansible || self.bash)
    }
}

fn is_ci_file(path: &str) -> bool {
    path.starts_with(".github/") || path.contains("/.github/")
}

/// Everything the generators read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactContext {
    pub application: String,
    pub branch: String,
    pub app_dir: String,
    pub host: String,
    pub port: u16,
    pub username: String,
}

impl ArtifactContext {
    pub fn new(app: &Application, branch: &str, server: &ServerProfile) -> Self {
        Self {
            application: app.name.clone(),
            branch: branch.to_string(),
            app_dir: server.app_dir(&app.name),
            host: server.host.clone(),
            port: server.port,
            username: server.username.clone(),
        }
    }
}

/// The three generated files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArtifacts {
    pub deploy_sh: String,
    pub rollback_sh: String,
    pub workflow: String,
}

impl GeneratedArtifacts {
    pub fn generate(ctx: &ArtifactContext, kinds: DetectedKinds) -> Self {
        Self {
            deploy_sh: deploy_script(ctx, kinds),
            rollback_sh: rollback_script(ctx, kinds),
            workflow: workflow(ctx),
        }
    }

    /// Repository paths and contents, scripts next to the templates and
    /// the workflow at the repository root
    pub fn files(&self, app_path: &str, workflow_file: &str) -> Vec<(String, String)> {
        let in_app = |name: &str| {
            let folder = app_path.trim_matches('/');
            if folder.is_empty() {
                name.to_string()
            } else {
                format!("{}/{}", folder, name)
            }
        };
        vec![
            (in_app(DEPLOY_SCRIPT), self.deploy_sh.clone()),
            (in_app(ROLLBACK_SCRIPT), self.rollback_sh.clone()),
            (
                format!("{}/{}", WORKFLOW_DIR, workflow_file),
                self.workflow.clone(),
            ),
        ]
    }

    /// SHA-256 over all three artifacts
    pub fn digest(&self) -> String {
        let joined = [
            self.deploy_sh.as_str(),
            self.rollback_sh.as_str(),
            self.workflow.as_str(),
        ]
        .join("\0");
        sha256_hash(joined.as_bytes())
    }
}

const TERRAFORM_DIRS: &str =
    "find . -name '*.tf' -not -path '*/.terraform/*' -exec dirname {} \\; | sort -u";

/// Build `deploy.sh`
///
/// Expects the `become` password in `BECOME_PASSWORD`.
pub fn deploy_script(ctx: &ArtifactContext, kinds: DetectedKinds) -> String {
    let mut s = String::new();
    s.push_str("#!/bin/bash\nset -e\n\n");
    s.push_str(&format!("APP_DIR={}\n", shell_quote(&ctx.app_dir)));
    s.push_str("cd \"$APP_DIR\"\n\n");
    s.push_str(&format!(
        "echo {}\n\n",
        shell_quote(&format!("==> Deploying {}", ctx.application))
    ));

    if kinds.is_empty() {
        s.push_str("echo 'Nothing to deploy: no Terraform, Ansible or shell files found'\n");
        s.push_str("exit 0\n");
        return s;
    }

    if kinds.terraform {
        s.push_str("# Terraform\n");
        s.push_str(&require_tool("terraform"));
        s.push_str(&format!("{} | while IFS= read -r dir; do\n", TERRAFORM_DIRS));
        s.push_str("  echo \"==> terraform apply in $dir\"\n");
        s.push_str(
            "  (cd \"$dir\" && terraform init -input=false && terraform apply -auto-approve -input=false) </dev/null\n",
        );
        s.push_str("done\n\n");
    }

    if kinds.ansible {
        s.push_str("# Ansible\n");
        s.push_str(&require_tool("ansible-playbook"));
        s.push_str("BECOME_FILE=$(mktemp)\n");
        s.push_str("trap 'rm -f \"$BECOME_FILE\"' EXIT\n");
        s.push_str("chmod 600 \"$BECOME_FILE\"\n");
        s.push_str("printf '%s\\n' \"${BECOME_PASSWORD:-}\" > \"$BECOME_FILE\"\n");
        s.push_str(
            "find . \\( -name '*.yml' -o -name '*.yaml' \\) -not -path './.github/*' | sort | while IFS= read -r playbook; do\n",
        );
        s.push_str("  echo \"==> ansible-playbook $playbook\"\n");
        s.push_str(
            "  if ! ansible-playbook -i localhost, -c local --become-password-file \"$BECOME_FILE\" \"$playbook\" </dev/null; then\n",
        );
        s.push_str("    echo \"!! $playbook failed, continuing\" >&2\n");
        s.push_str("  fi\n");
        s.push_str("done\n\n");
    }

    if kinds.bash {
        s.push_str("# Shell scripts\n");
        s.push_str(&format!(
            "find . -name '*.sh' -not -name '{}' -not -name '{}' | sort | while IFS= read -r script; do\n",
            DEPLOY_SCRIPT, ROLLBACK_SCRIPT
        ));
        s.push_str("  echo \"==> bash $script\"\n");
        s.push_str("  if ! bash \"$script\" </dev/null; then\n");
        s.push_str("    echo \"!! $script failed, continuing\" >&2\n");
        s.push_str("  fi\n");
        s.push_str("done\n\n");
    }

    s.push_str("echo '==> Deployment finished'\n");
    s
}

fn require_tool(tool: &str) -> String {
    format!(
        "if ! command -v {tool} >/dev/null 2>&1; then\n  echo '{tool} is not installed on this server' >&2\n  exit 1\nfi\n"
    )
}

/// Build `rollback.sh`; every step is best effort and the script exits 0
pub fn rollback_script(ctx: &ArtifactContext, kinds: DetectedKinds) -> String {
    let mut s = String::new();
    s.push_str("#!/bin/bash\n\n");
    s.push_str(&format!("APP_DIR={}\n", shell_quote(&ctx.app_dir)));
    s.push_str("cd \"$APP_DIR\" || exit 0\n\n");
    s.push_str(&format!(
        "echo {}\n\n",
        shell_quote(&format!("==> Rolling back {}", ctx.application))
    ));

    if kinds.terraform {
        s.push_str("if command -v terraform >/dev/null 2>&1; then\n");
        s.push_str(&format!("  {} | while IFS= read -r dir; do\n", TERRAFORM_DIRS));
        s.push_str(
            "    (cd \"$dir\" && terraform destroy -auto-approve -input=false) </dev/null || echo \"!! terraform destroy failed in $dir\" >&2\n",
        );
        s.push_str("  done\n");
        s.push_str("fi\n\n");
    }

    s.push_str("git reset --hard HEAD~1 || echo '!! git reset failed' >&2\n");
    s.push_str("exit 0\n");
    s
}

/// Build the CI workflow
///
/// Pushes to the branch deploy; a manual dispatch with `rollback` set runs
/// only the rollback script; a failed deploy triggers the rollback job.
pub fn workflow(ctx: &ArtifactContext) -> String {
    let ssh_with = format!(
        "          host: {host}\n          port: {port}\n          username: {user}\n          password: ${{{{ secrets.SERVER_PASSWORD }}}}\n",
        host = yaml_quote(&ctx.host),
        port = ctx.port,
        user = yaml_quote(&ctx.username),
    );
    let step = |name: &str, script: &str, with_env: bool| {
        let mut out = format!("      - name: {}\n        uses: appleboy/ssh-action@v1.0.3\n", name);
        if with_env {
            out.push_str("        env:\n          BECOME_PASSWORD: ${{ secrets.SERVER_PASSWORD }}\n");
        }
        out.push_str("        with:\n");
        out.push_str(&ssh_with);
        if with_env {
            out.push_str("          envs: BECOME_PASSWORD\n");
        }
        out.push_str(&format!(
            "          script: |\n            cd {} && bash ./{}\n",
            shell_quote(&ctx.app_dir),
            script
        ));
        out
    };

    let mut s = String::new();
    s.push_str(&format!(
        "name: {}\n\n",
        yaml_quote(&format!("Deploy {}", ctx.application))
    ));
    s.push_str("on:\n  push:\n    branches:\n");
    s.push_str(&format!("      - {}\n", yaml_quote(&ctx.branch)));
    s.push_str("  workflow_dispatch:\n    inputs:\n      rollback:\n");
    s.push_str("        description: \"Run rollback.sh instead of deploy.sh\"\n");
    s.push_str("        type: boolean\n        default: false\n\n");

    s.push_str("jobs:\n");
    s.push_str("  deploy:\n");
    s.push_str("    if: ${{ !inputs.rollback }}\n");
    s.push_str("    runs-on: ubuntu-latest\n    steps:\n");
    s.push_str(&step("Deploy over SSH", DEPLOY_SCRIPT, true));
    s.push('\n');

    s.push_str("  rollback:\n");
    s.push_str("    needs: deploy\n");
    s.push_str("    if: ${{ failure() && !inputs.rollback }}\n");
    s.push_str("    runs-on: ubuntu-latest\n    steps:\n");
    s.push_str(&step("Roll back over SSH", ROLLBACK_SCRIPT, false));
    s.push('\n');

    s.push_str("  manual-rollback:\n");
    s.push_str("    if: ${{ github.event_name == 'workflow_dispatch' && inputs.rollback }}\n");
    s.push_str("    runs-on: ubuntu-latest\n    steps:\n");
    s.push_str(&step("Roll back over SSH", ROLLBACK_SCRIPT, false));
    s
}

/// Double-quoted YAML scalar; a JSON string literal is valid YAML
fn yaml_quote(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

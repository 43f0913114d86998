use super::lifecycle;
use super::Workspace;

pub fn run(workspace: &Workspace, services: &[String]) -> Result<u8, String> {
    lifecycle(workspace, services, |manager, scope| manager.restart(scope))
}

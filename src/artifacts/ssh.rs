//! SSH launch scripts

use crate::core::topology::Ssh;
use std::fmt::Write;

/// Builds the launch script for one `ssh` entry of server `name`.
///
/// ```
/// use fleetwall::artifacts::ssh::render_ssh;
/// use fleetwall::core::topology::Ssh;
///
/// let ssh = Ssh { user: "ops".into(), host: "bastion".into(), port: 2222, ..Ssh::default() };
/// let script = render_ssh("web", "admin", &ssh);
/// assert!(script.ends_with("ssh ops@bastion -p 2222\n"));
/// ```
pub fn render_ssh(name: &str, service: &str, ssh: &Ssh) -> String {
    let mut out = String::from("#!/bin/bash\n");
    let _ = writeln!(out, "### Server: \"{name}\"");

    let kind = match (ssh.tunnel, ssh.tunnel_reverse) {
        (false, _) => "",
        (true, false) => "Local Tunnel ",
        (true, true) => "Reverse Tunnel ",
    };
    let _ = writeln!(out, "### SSH {kind}Shell: \"{service}\"");

    out.push_str("ssh");
    for flag in &ssh.flags {
        let _ = write!(out, " {flag}");
    }
    if !ssh.key.is_empty() {
        let _ = write!(out, " -i {}", ssh.key);
    }

    if ssh.tunnel {
        if ssh.tunnel_reverse {
            // -R [remote-host:]remote-port:local-host:local-port
            out.push_str(" -R ");
            if !ssh.remote_host.is_empty() {
                let _ = write!(out, "{}:", ssh.remote_host);
            }
            let _ = write!(
                out,
                "{}:{}:{}",
                ssh.remote_port, ssh.local_host, ssh.local_port
            );
        } else {
            // -L [local-host:]local-port:remote-host:remote-port
            out.push_str(" -L ");
            if !ssh.local_host.is_empty() {
                let _ = write!(out, "{}:", ssh.local_host);
            }
            let _ = write!(
                out,
                "{}:{}:{}",
                ssh.local_port, ssh.remote_host, ssh.remote_port
            );
        }
    }

    out.push(' ');
    if !ssh.user.is_empty() {
        let _ = write!(out, "{}@", ssh.user);
    }
    out.push_str(&ssh.host);
    if ssh.port > 0 {
        let _ = write!(out, " -p {}", ssh.port);
    }
    out.push('\n');
    out
}

/// File name for one script: `<server>-<service>.sh`
pub fn script_name(name: &str, service: &str) -> String {
    format!("{name}-{service}.sh")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_shell() {
        let ssh = Ssh {
            host: "10.0.0.5".into(),
            ..Ssh::default()
        };
        assert_eq!(
            render_ssh("web", "db", &ssh),
            "#!/bin/bash\n### Server: \"web\"\n### SSH Shell: \"db\"\nssh 10.0.0.5\n"
        );
    }

    #[test]
    fn test_every_flag_written() {
        let ssh = Ssh {
            host: "h".into(),
            flags: vec!["-N".into(), "-T".into(), "-o ServerAliveInterval=30".into()],
            key: "~/.ssh/id_ed25519".into(),
            ..Ssh::default()
        };
        assert!(
            render_ssh("a", "b", &ssh)
                .ends_with("ssh -N -T -o ServerAliveInterval=30 -i ~/.ssh/id_ed25519 h\n")
        );
    }

    #[test]
    fn test_local_tunnel() {
        let ssh = Ssh {
            user: "ops".into(),
            host: "bastion".into(),
            port: 2222,
            tunnel: true,
            local_port: 13306,
            remote_host: "db.internal".into(),
            remote_port: 3306,
            ..Ssh::default()
        };
        let script = render_ssh("web", "mysql", &ssh);
        assert!(script.contains("### SSH Local Tunnel Shell: \"mysql\"\n"));
        assert!(script.ends_with("ssh -L 13306:db.internal:3306 ops@bastion -p 2222\n"));
    }

    #[test]
    fn test_reverse_tunnel_with_hosts() {
        let ssh = Ssh {
            host: "relay".into(),
            tunnel: true,
            tunnel_reverse: true,
            local_host: "127.0.0.1".into(),
            local_port: 22,
            remote_host: "0.0.0.0".into(),
            remote_port: 2022,
            ..Ssh::default()
        };
        let script = render_ssh("home", "back", &ssh);
        assert!(script.contains("### SSH Reverse Tunnel Shell: \"back\"\n"));
        assert!(script.ends_with("ssh -R 0.0.0.0:2022:127.0.0.1:22 relay\n"));
    }

    #[test]
    fn test_script_name() {
        assert_eq!(script_name("web", "admin"), "web-admin.sh");
    }
}

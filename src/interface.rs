//! `interface` subcommand: mesh membership of hard interfaces
//!
//! Listing reads the enslaved links from an rtnetlink dump and their
//! status from sysfs. Adding and removing interfaces sets `IFLA_MASTER`;
//! the mesh interface itself is created on first add and destroyed once
//! the last interface is gone.

use crate::netlink::rtnl::{RtnlError, RtnlHandle};
use crate::netlink::session::InterfaceResolver;
use crate::netlink::socket::Transport;
use crate::strerror;
use crate::sysfs::{SysfsLayout, iface_status};
use std::io::{self, Write};

pub const USAGE: &str = "Usage: batctl [options] interface [parameters] [add|del iface(s)]\n\
       batctl [options] interface [parameters] [create|destroy]\n\
parameters:\n\
 \t -h print this help\n";

const STATUS_UNREADABLE: &str = "<error reading status>\n";

#[derive(Debug, thiserror::Error)]
pub enum InterfaceError {
    #[error("Error - unknown argument specified: {0}")]
    UnknownArgument(String),

    #[error("Error - missing interface name(s) after '{0}'")]
    MissingInterfaces(String),

    #[error("Error - extra parameter after '{0}'")]
    ExtraParameter(String),

    #[error("Error - batman-adv module has not been loaded")]
    ModuleNotLoaded,

    #[error("Error - interface {0} is unknown")]
    UnknownMesh(String),

    #[error("Error - failed to create batman-adv interface: {}", strerror(.0.abs()))]
    Create(i32),

    #[error("Error - failed to destroy batman-adv interface: {}", strerror(.0.abs()))]
    Destroy(i32),

    #[error("Error - failed to find batman-adv interface: {}", strerror(.0.abs()))]
    MeshNotFound(i32),

    #[error("Error - failed to {op} interface {iface}: {}", strerror(.errno.abs()))]
    SetMaster {
        op: &'static str,
        iface: String,
        errno: i32,
    },

    #[error("Error - can't query interfaces: {0}")]
    Rtnl(#[from] RtnlError),

    #[error("{0}")]
    Io(#[from] io::Error),
}

impl InterfaceError {
    /// Argument errors that are followed by the usage text
    #[must_use]
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            InterfaceError::UnknownArgument(_)
                | InterfaceError::MissingInterfaces(_)
                | InterfaceError::ExtraParameter(_)
        )
    }
}

/// What `batctl interface ...` was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceAction {
    List,
    Add(Vec<String>),
    Del(Vec<String>),
    Create,
    Destroy,
}

impl InterfaceAction {
    /// Parse the positional arguments after `interface`
    ///
    /// # Errors
    ///
    /// Usage errors naming the offending argument.
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self, InterfaceError> {
        let Some((verb, rest)) = args.split_first() else {
            return Ok(InterfaceAction::List);
        };
        let verb = verb.as_ref();
        let names = || rest.iter().map(|s| s.as_ref().to_string()).collect::<Vec<_>>();

        match verb {
            "add" | "a" | "del" | "d" => {
                if rest.is_empty() {
                    return Err(InterfaceError::MissingInterfaces(verb.to_string()));
                }
                if verb.starts_with('a') {
                    Ok(InterfaceAction::Add(names()))
                } else {
                    Ok(InterfaceAction::Del(names()))
                }
            }
            "create" | "c" | "destroy" | "D" => {
                if !rest.is_empty() {
                    return Err(InterfaceError::ExtraParameter(verb.to_string()));
                }
                if verb.starts_with('c') {
                    Ok(InterfaceAction::Create)
                } else {
                    Ok(InterfaceAction::Destroy)
                }
            }
            other => Err(InterfaceError::UnknownArgument(other.to_string())),
        }
    }
}

/// Interface management bound to one mesh interface
pub struct InterfaceManager<'a, T: Transport, R: InterfaceResolver + ?Sized> {
    pub rtnl: RtnlHandle<T>,
    pub layout: &'a SysfsLayout,
    pub resolver: &'a R,
    pub mesh_iface: &'a str,
}

impl<T: Transport, R: InterfaceResolver + ?Sized> InterfaceManager<'_, T, R> {
    /// Carry out `action`
    ///
    /// Unknown interfaces in an add/del list are reported on `err` and
    /// skipped; every other failure ends the run.
    ///
    /// # Errors
    ///
    /// `InterfaceError` describing the failed step.
    pub fn run(
        &mut self,
        action: &InterfaceAction,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<(), InterfaceError> {
        match action {
            InterfaceAction::List => self.list(out),
            InterfaceAction::Create => self
                .rtnl
                .create_mesh(self.mesh_iface)
                .map_err(|e| InterfaceError::Create(e.errno())),
            InterfaceAction::Destroy => self
                .rtnl
                .destroy_mesh(self.mesh_iface)
                .map_err(|e| InterfaceError::Destroy(e.errno())),
            InterfaceAction::Add(ifaces) => self.update(true, ifaces, err),
            InterfaceAction::Del(ifaces) => self.update(false, ifaces, err),
        }
    }

    fn list(&mut self, out: &mut dyn Write) -> Result<(), InterfaceError> {
        if !self.layout.module_loaded() {
            return Err(InterfaceError::ModuleNotLoaded);
        }

        let master = self
            .resolver
            .index_of(self.mesh_iface)
            .ok_or_else(|| InterfaceError::UnknownMesh(self.mesh_iface.to_string()))?;

        for link in self.rtnl.links_with_master(master)? {
            let status = iface_status(self.layout, &link.name)
                .unwrap_or_else(|_| STATUS_UNREADABLE.to_string());
            write!(out, "{}: {}", link.name, status)?;
        }
        Ok(())
    }

    fn update(
        &mut self,
        add: bool,
        ifaces: &[String],
        err: &mut dyn Write,
    ) -> Result<(), InterfaceError> {
        let mut master = self.resolver.index_of(self.mesh_iface);
        if master.is_none() && add {
            self.rtnl
                .create_mesh(self.mesh_iface)
                .map_err(|e| InterfaceError::Create(e.errno()))?;
            master = self.resolver.index_of(self.mesh_iface);
        }

        let master = master.ok_or(InterfaceError::MeshNotFound(libc::ENODEV))?;

        // create_mesh may have loaded the module on demand
        if !self.layout.module_loaded() {
            return Err(InterfaceError::ModuleNotLoaded);
        }

        for iface in ifaces {
            if self.resolver.index_of(iface).is_none() {
                writeln!(err, "Error - interface does not exist: {iface}")?;
                continue;
            }

            let target = if add { master } else { 0 };
            self.rtnl
                .set_master(iface, target)
                .map_err(|e| InterfaceError::SetMaster {
                    op: if add { "add" } else { "delete" },
                    iface: iface.clone(),
                    errno: e.errno(),
                })?;
        }

        if !add {
            match self.rtnl.links_with_master(master) {
                Ok(left) if left.is_empty() => {
                    if let Err(e) = self.rtnl.destroy_mesh(self.mesh_iface) {
                        tracing::debug!(mesh = self.mesh_iface, error = %e, "mesh interface not destroyed");
                    }
                }
                Ok(left) => tracing::trace!(remaining = left.len(), "mesh interface kept"),
                Err(e) => tracing::debug!(error = %e, "could not count remaining interfaces"),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::message::MessageBuilder;
    use crate::netlink::socket::SocketError;
    use crate::netlink::structures::*;
    use std::cell::RefCell;
    use std::collections::{HashMap, VecDeque};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static SCRATCH_ID: AtomicUsize = AtomicUsize::new(0);

    struct Scripted {
        sent: RefCell<Vec<Vec<u8>>>,
        replies: RefCell<VecDeque<Vec<u8>>>,
    }

    impl Transport for Scripted {
        fn send(&self, data: &[u8]) -> Result<(), SocketError> {
            self.sent.borrow_mut().push(data.to_vec());
            Ok(())
        }

        fn recv(&self, buffer: &mut [u8]) -> Result<usize, SocketError> {
            let Some(reply) = self.replies.borrow_mut().pop_front() else {
                return Ok(0);
            };
            buffer[..reply.len()].copy_from_slice(&reply);
            Ok(reply.len())
        }
    }

    fn rtnl(replies: Vec<Vec<u8>>) -> RtnlHandle<Scripted> {
        RtnlHandle::with_transport(Scripted {
            sent: RefCell::default(),
            replies: RefCell::new(replies.into()),
        })
    }

    fn sent_types(rtnl: &RtnlHandle<Scripted>) -> Vec<u16> {
        rtnl.transport()
            .sent
            .borrow()
            .iter()
            .filter_map(|m| read_struct::<NlMsgHdr>(m).map(|h| h.nlmsg_type))
            .collect()
    }

    struct Links(HashMap<&'static str, u32>);

    impl InterfaceResolver for Links {
        fn index_of(&self, name: &str) -> Option<u32> {
            self.0.get(name).copied()
        }

        fn name_of(&self, index: u32) -> Option<String> {
            self.0
                .iter()
                .find(|(_, i)| **i == index)
                .map(|(name, _)| (*name).to_string())
        }
    }

    fn ack(errno: i32) -> Vec<u8> {
        let mut builder = MessageBuilder::new(NLMSG_ERROR, 0, 1);
        builder.put_struct(&(-errno));
        builder.finish()
    }

    fn link_dump(links: &[(i32, &str, u32)]) -> Vec<Vec<u8>> {
        let mut datagram = Vec::new();
        for (index, name, master) in links {
            let mut builder = MessageBuilder::new(RTM_NEWLINK, NLM_F_MULTI, 1);
            builder.put_struct(&IfInfoMsg {
                ifi_index: *index,
                ..IfInfoMsg::default()
            });
            builder.put_string(IFLA_IFNAME, name);
            builder.put_u32(IFLA_MASTER, *master);
            datagram.extend(builder.finish());
        }
        let mut done = MessageBuilder::new(NLMSG_DONE, NLM_F_MULTI, 1);
        done.put_struct(&0i32);
        vec![datagram, done.finish()]
    }

    struct Scratch(SysfsLayout);

    impl Scratch {
        fn loaded() -> Self {
            let id = SCRATCH_ID.fetch_add(1, Ordering::Relaxed);
            let root = std::env::temp_dir().join(format!(
                "batctl-iface-{}-{}",
                std::process::id(),
                id
            ));
            let _ = fs::remove_dir_all(&root);
            let layout = SysfsLayout::with_root(root);
            fs::create_dir_all(layout.module_version().parent().unwrap()).unwrap();
            fs::write(layout.module_version(), "2019.2\n").unwrap();
            Self(layout)
        }

        fn status(&self, iface: &str, status: &str) {
            let dir = self.0.hardif_dir(iface);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("iface_status"), status).unwrap();
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(self.0.root());
        }
    }

    fn links() -> Links {
        Links(HashMap::from([("bat0", 7), ("eth0", 3), ("eth1", 4)]))
    }

    #[test]
    fn test_parse_actions() {
        assert_eq!(InterfaceAction::parse::<&str>(&[]).unwrap(), InterfaceAction::List);
        assert_eq!(
            InterfaceAction::parse(&["a", "eth0", "eth1"]).unwrap(),
            InterfaceAction::Add(vec!["eth0".to_string(), "eth1".to_string()])
        );
        assert_eq!(
            InterfaceAction::parse(&["del", "eth0"]).unwrap(),
            InterfaceAction::Del(vec!["eth0".to_string()])
        );
        assert_eq!(InterfaceAction::parse(&["D"]).unwrap(), InterfaceAction::Destroy);
        assert_eq!(InterfaceAction::parse(&["create"]).unwrap(), InterfaceAction::Create);
    }

    #[test]
    fn test_parse_errors() {
        let err = InterfaceAction::parse(&["add"]).unwrap_err();
        assert_eq!(err.to_string(), "Error - missing interface name(s) after 'add'");
        assert!(err.is_usage());

        let err = InterfaceAction::parse(&["destroy", "eth0"]).unwrap_err();
        assert_eq!(err.to_string(), "Error - extra parameter after 'destroy'");

        let err = InterfaceAction::parse(&["up"]).unwrap_err();
        assert_eq!(err.to_string(), "Error - unknown argument specified: up");
    }

    #[test]
    fn test_list_prints_status() {
        let scratch = Scratch::loaded();
        scratch.status("eth0", "active\n");
        let resolver = links();
        let mut manager = InterfaceManager {
            rtnl: rtnl(link_dump(&[(3, "eth0", 7), (4, "eth1", 7), (5, "wlan0", 9)])),
            layout: &scratch.0,
            resolver: &resolver,
            mesh_iface: "bat0",
        };

        let mut out = Vec::new();
        manager
            .run(&InterfaceAction::List, &mut out, &mut io::sink())
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "eth0: active\neth1: <error reading status>\n"
        );
    }

    #[test]
    fn test_list_requires_module() {
        let layout = SysfsLayout::with_root(std::env::temp_dir().join("batctl-no-module-here"));
        let resolver = links();
        let mut manager = InterfaceManager {
            rtnl: rtnl(vec![]),
            layout: &layout,
            resolver: &resolver,
            mesh_iface: "bat0",
        };
        let err = manager
            .run(&InterfaceAction::List, &mut io::sink(), &mut io::sink())
            .unwrap_err();
        assert!(matches!(err, InterfaceError::ModuleNotLoaded));
    }

    #[test]
    fn test_add_skips_unknown_interfaces() {
        let scratch = Scratch::loaded();
        let resolver = links();
        let mut manager = InterfaceManager {
            rtnl: rtnl(vec![ack(0)]),
            layout: &scratch.0,
            resolver: &resolver,
            mesh_iface: "bat0",
        };

        let mut err = Vec::new();
        manager
            .run(
                &InterfaceAction::Add(vec!["wlan9".to_string(), "eth0".to_string()]),
                &mut io::sink(),
                &mut err,
            )
            .unwrap();

        assert_eq!(
            String::from_utf8(err).unwrap(),
            "Error - interface does not exist: wlan9\n"
        );
        assert_eq!(sent_types(&manager.rtnl), vec![RTM_SETLINK]);
    }

    #[test]
    fn test_add_creates_missing_mesh() {
        let scratch = Scratch::loaded();
        let resolver = Links(HashMap::from([("eth0", 3)]));
        let mut manager = InterfaceManager {
            rtnl: rtnl(vec![ack(0)]),
            layout: &scratch.0,
            resolver: &resolver,
            mesh_iface: "bat0",
        };

        // The fake resolver never learns about the new link
        let err = manager
            .run(
                &InterfaceAction::Add(vec!["eth0".to_string()]),
                &mut io::sink(),
                &mut io::sink(),
            )
            .unwrap_err();
        assert!(matches!(err, InterfaceError::MeshNotFound(libc::ENODEV)));
        assert_eq!(sent_types(&manager.rtnl), vec![RTM_NEWLINK]);
    }

    #[test]
    fn test_set_master_failure_names_operation() {
        let scratch = Scratch::loaded();
        let resolver = links();
        let mut manager = InterfaceManager {
            rtnl: rtnl(vec![ack(libc::EBUSY)]),
            layout: &scratch.0,
            resolver: &resolver,
            mesh_iface: "bat0",
        };
        let err = manager
            .run(
                &InterfaceAction::Del(vec!["eth0".to_string()]),
                &mut io::sink(),
                &mut io::sink(),
            )
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            format!(
                "Error - failed to delete interface eth0: {}",
                strerror(libc::EBUSY)
            )
        );
    }

    #[test]
    fn test_del_destroys_empty_mesh() {
        let scratch = Scratch::loaded();
        let resolver = links();
        let mut replies = vec![ack(0)];
        replies.extend(link_dump(&[(4, "eth1", 9)]));
        replies.push(ack(0));
        let mut manager = InterfaceManager {
            rtnl: rtnl(replies),
            layout: &scratch.0,
            resolver: &resolver,
            mesh_iface: "bat0",
        };

        manager
            .run(
                &InterfaceAction::Del(vec!["eth0".to_string()]),
                &mut io::sink(),
                &mut io::sink(),
            )
            .unwrap();
        assert_eq!(
            sent_types(&manager.rtnl),
            vec![RTM_SETLINK, RTM_GETLINK, RTM_DELLINK]
        );
    }

    #[test]
    fn test_create_failure_message() {
        let scratch = Scratch::loaded();
        let resolver = links();
        let mut manager = InterfaceManager {
            rtnl: rtnl(vec![ack(libc::EEXIST)]),
            layout: &scratch.0,
            resolver: &resolver,
            mesh_iface: "bat0",
        };
        let err = manager
            .run(&InterfaceAction::Create, &mut io::sink(), &mut io::sink())
            .unwrap_err();
        assert!(matches!(err, InterfaceError::Create(libc::EEXIST)));
    }
}

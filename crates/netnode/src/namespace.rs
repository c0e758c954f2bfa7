//! Network namespace handles.
//!
//! A [`Namespace`] is either created (and owned) by this process, or adopted
//! from something else: a name under [`NETNS_RUN_DIR`] or a running
//! container. Closing an owned namespace removes its name so the kernel can
//! free it; closing an adopted one only drops our file descriptor.
//!
//! Joining a namespace is a per-thread change. Everything that has to run
//! "inside" a namespace goes through [`run_in`], which uses a scoped thread
//! that is thrown away afterwards, so async worker threads never switch.
//!
//! ```ignore
//! use netnode::namespace::{self, Namespace};
//!
//! let ns = Namespace::create("netnode-lab-h1")?;
//! let hostname = namespace::run_in(ns.fd(), || std::fs::read_to_string("/proc/sys/kernel/hostname"))??;
//! ns.close()?;
//! ```

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::mount::{MntFlags, MsFlags, mount, umount2};
use nix::sched::{CloneFlags, setns, unshare};
use tracing::{debug, info, warn};

use crate::container::ContainerRuntime;
use crate::error::{Error, Result};

/// Directory holding named network namespaces (as used by `ip netns`).
pub const NETNS_RUN_DIR: &str = "/var/run/netns";

/// An open namespace file together with the name it is known by.
#[derive(Debug)]
pub struct NamespaceFd {
    name: String,
    path: PathBuf,
    file: File,
}

impl NamespaceFd {
    /// Open the namespace file at `path`.
    pub fn open(name: impl Into<String>, path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        Ok(Self {
            name: name.into(),
            path,
            file,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The file this handle was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path through which the open descriptor can be bind-mounted.
    pub fn proc_fd_path(&self) -> PathBuf {
        PathBuf::from(format!("/proc/self/fd/{}", self.file.as_raw_fd()))
    }
}

impl AsFd for NamespaceFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl AsRawFd for NamespaceFd {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// Where an adopted namespace came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdoptedFrom {
    /// A name under [`NETNS_RUN_DIR`].
    Named,
    /// The init process of a container.
    Container(String),
}

/// A network namespace handle.
#[derive(Debug)]
pub enum Namespace {
    /// Created by us; closing destroys its name.
    Owned(NamespaceFd),
    /// Managed elsewhere; closing only drops our descriptor.
    Adopted(NamespaceFd, AdoptedFrom),
}

impl Namespace {
    /// Create a new network namespace reachable as `/var/run/netns/<name>`.
    ///
    /// Fails if a namespace with that name already exists.
    pub fn create(name: &str) -> Result<Self> {
        let path = Path::new(NETNS_RUN_DIR).join(name);
        let fd = create_named(name, &path).map_err(|source| Error::NamespaceCreate {
            name: name.to_string(),
            source,
        })?;
        info!(namespace = %name, "created network namespace");
        Ok(Self::Owned(fd))
    }

    /// Adopt the existing namespace `/var/run/netns/<name>`.
    pub fn adopt_by_name(name: &str) -> Result<Self> {
        let path = Path::new(NETNS_RUN_DIR).join(name);
        let fd = NamespaceFd::open(name, path).map_err(|source| Error::NamespaceNotFound {
            name: name.to_string(),
            source,
        })?;
        debug!(namespace = %name, "adopted named network namespace");
        Ok(Self::Adopted(fd, AdoptedFrom::Named))
    }

    /// Adopt the network namespace of a running container.
    pub fn adopt_from_container(runtime: &dyn ContainerRuntime, id: &str) -> Result<Self> {
        let not_found = |reason: String| Error::ContainerNotFound {
            id: id.to_string(),
            reason,
        };

        let pid = runtime.init_pid(id).map_err(not_found)?;
        let path = PathBuf::from(format!("/proc/{pid}/ns/net"));
        let fd = NamespaceFd::open(id, &path)
            .map_err(|e| not_found(format!("{}: {e}", path.display())))?;
        debug!(container = %id, pid, "adopted container network namespace");
        Ok(Self::Adopted(fd, AdoptedFrom::Container(id.to_string())))
    }

    pub fn fd(&self) -> &NamespaceFd {
        match self {
            Self::Owned(fd) | Self::Adopted(fd, _) => fd,
        }
    }

    pub fn name(&self) -> &str {
        self.fd().name()
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    /// Release the handle.
    ///
    /// For an owned namespace the `/var/run/netns` entry is detached and
    /// removed as well; an entry that is already gone is not an error.
    pub fn close(self) -> Result<()> {
        match self {
            Self::Adopted(fd, _) => {
                debug!(namespace = %fd.name, "released adopted network namespace");
                Ok(())
            }
            Self::Owned(fd) => {
                let NamespaceFd { name, path, file } = fd;
                drop(file);
                remove_named(&path).map_err(|source| Error::NamespaceClose {
                    name: name.clone(),
                    source,
                })?;
                info!(namespace = %name, "removed network namespace");
                Ok(())
            }
        }
    }
}

fn create_named(name: &str, path: &Path) -> io::Result<NamespaceFd> {
    fs::create_dir_all(NETNS_RUN_DIR)?;

    // Mount point for the namespace; create_new rejects name collisions.
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o444)
        .open(path)?;

    let result = std::thread::scope(|scope| {
        let handle = std::thread::Builder::new()
            .name(format!("netns-create-{name}"))
            .spawn_scoped(scope, || -> io::Result<File> {
                unshare(CloneFlags::CLONE_NEWNET)?;
                let own = Path::new("/proc/thread-self/ns/net");
                mount(
                    Some(own),
                    path,
                    None::<&str>,
                    MsFlags::MS_BIND,
                    None::<&str>,
                )?;
                File::open(own)
            })?;
        handle
            .join()
            .map_err(|_| io::Error::other("namespace creation thread panicked"))?
    });

    match result {
        Ok(file) => Ok(NamespaceFd {
            name: name.to_string(),
            path: path.to_path_buf(),
            file,
        }),
        Err(e) => {
            if let Err(cleanup) = remove_named(path) {
                warn!(namespace = %name, error = %cleanup, "cannot remove half-created namespace entry");
            }
            Err(e)
        }
    }
}

/// Detach and delete a namespace entry, tolerating one that is already gone.
fn remove_named(path: &Path) -> io::Result<()> {
    match umount2(path, MntFlags::MNT_DETACH) {
        Ok(()) | Err(nix::errno::Errno::EINVAL) | Err(nix::errno::Errno::ENOENT) => {}
        Err(e) => return Err(e.into()),
    }
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Switches the current thread into a namespace until dropped.
struct NamespaceGuard {
    original: File,
}

impl NamespaceGuard {
    fn enter(ns: &NamespaceFd) -> io::Result<Self> {
        let original = File::open("/proc/thread-self/ns/net")?;
        setns(ns, CloneFlags::CLONE_NEWNET)?;
        Ok(Self { original })
    }
}

impl Drop for NamespaceGuard {
    fn drop(&mut self) {
        if let Err(e) = setns(&self.original, CloneFlags::CLONE_NEWNET) {
            warn!(error = %e, "failed to restore network namespace");
        }
    }
}

/// Run `f` on a dedicated thread that has joined `ns`.
///
/// Blocks until `f` returns. The outer error covers entering the namespace
/// and spawning the thread; `f`'s own result is returned as is.
pub fn run_in<F, T>(ns: &NamespaceFd, f: F) -> io::Result<T>
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    std::thread::scope(|scope| {
        let handle = std::thread::Builder::new()
            .name(format!("netns-{}", ns.name))
            .spawn_scoped(scope, || -> io::Result<T> {
                let _guard = NamespaceGuard::enter(ns)?;
                Ok(f())
            })?;
        handle
            .join()
            .map_err(|_| io::Error::other("namespace thread panicked"))?
    })
}

/// Whether `/var/run/netns/<name>` exists.
pub fn exists(name: &str) -> bool {
    Path::new(NETNS_RUN_DIR).join(name).exists()
}

/// Names under [`NETNS_RUN_DIR`], sorted.
pub fn list() -> io::Result<Vec<String>> {
    let dir = match fs::read_dir(NETNS_RUN_DIR) {
        Ok(d) => d,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut names = Vec::new();
    for entry in dir {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

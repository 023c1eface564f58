use std::fmt;

/// Types that can be written as a single command argument.
pub trait ToRedisArg {
    /// Appends the binary representation of `self` to `out`.
    fn write_redis_arg(&self, out: &mut Vec<u8>);
}

macro_rules! itoa_based_to_redis_impl {
    ($t:ty) => {
        impl ToRedisArg for $t {
            fn write_redis_arg(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(self.to_string().as_bytes());
            }
        }
    };
}

itoa_based_to_redis_impl!(i8);
itoa_based_to_redis_impl!(i16);
itoa_based_to_redis_impl!(i32);
itoa_based_to_redis_impl!(i64);
itoa_based_to_redis_impl!(isize);
itoa_based_to_redis_impl!(u8);
itoa_based_to_redis_impl!(u16);
itoa_based_to_redis_impl!(u32);
itoa_based_to_redis_impl!(u64);
itoa_based_to_redis_impl!(usize);

impl ToRedisArg for str {
    fn write_redis_arg(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }
}

impl ToRedisArg for String {
    fn write_redis_arg(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }
}

impl ToRedisArg for [u8] {
    fn write_redis_arg(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl ToRedisArg for Vec<u8> {
    fn write_redis_arg(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl<T: ToRedisArg + ?Sized> ToRedisArg for &T {
    fn write_redis_arg(&self, out: &mut Vec<u8>) {
        (*self).write_redis_arg(out)
    }
}

/// Represents redis commands.
///
/// The first argument is the command name, the rest are its arguments. Encoding them for
/// the wire is the transport's business.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Cmd {
    args: Vec<Vec<u8>>,
}

/// Shortcut function to creating a command with a single argument.
///
/// The first argument of a redis command is always the name of the command
/// which needs to be a string.  This is the recommended way to start a
/// command pipe.
///
/// ```rust
/// redis_mux::cmd("PING");
/// ```
pub fn cmd(name: &str) -> Cmd {
    let mut rv = Cmd::new();
    rv.arg(name);
    rv
}

// Commands that manage or inspect the server rather than the data.
const ADMIN_COMMANDS: &[&str] = &[
    "ACL",
    "BGREWRITEAOF",
    "BGSAVE",
    "CLIENT",
    "CLUSTER",
    "CONFIG",
    "DEBUG",
    "FAILOVER",
    "FLUSHALL",
    "FLUSHDB",
    "INFO",
    "KEYS",
    "LASTSAVE",
    "LATENCY",
    "MEMORY",
    "MIGRATE",
    "MODULE",
    "MONITOR",
    "REPLICAOF",
    "SAVE",
    "SCRIPT",
    "SHUTDOWN",
    "SLAVEOF",
    "SLOWLOG",
    "SWAPDB",
];

// Commands whose first argument is not a key.
const KEYLESS_COMMANDS: &[&str] = &[
    "AUTH", "ECHO", "EVAL", "EVALSHA", "FCALL", "HELLO", "PING", "PUBLISH", "QUIT", "ROLE",
    "SELECT", "SPUBLISH", "SUBSCRIBE", "PSUBSCRIBE", "UNSUBSCRIBE", "PUNSUBSCRIBE", "TIME",
    "ASKING", "READONLY", "DBSIZE", "MULTI", "EXEC", "DISCARD", "WAIT",
];

impl Cmd {
    /// Creates a new empty command.
    pub fn new() -> Cmd {
        Cmd::default()
    }

    /// Appends an argument to the command.
    ///
    /// ```rust
    /// let mut cmd = redis_mux::cmd("SET");
    /// cmd.arg("my_key").arg(42);
    /// assert_eq!(cmd.args().count(), 3);
    /// ```
    #[inline]
    pub fn arg<T: ToRedisArg>(&mut self, arg: T) -> &mut Cmd {
        let mut out = Vec::new();
        arg.write_redis_arg(&mut out);
        self.args.push(out);
        self
    }

    /// Returns an iterator over the arguments in this command (including the command name itself).
    pub fn args(&self) -> impl ExactSizeIterator<Item = &[u8]> + Clone {
        self.args.iter().map(|arg| arg.as_slice())
    }

    /// Returns the argument at `idx`, if it exists.
    pub fn arg_idx(&self, idx: usize) -> Option<&[u8]> {
        self.args.get(idx).map(|arg| arg.as_slice())
    }

    /// Returns the upper-cased command name, or an empty string for an empty command.
    pub fn name(&self) -> String {
        self.arg_idx(0)
            .map(|name| String::from_utf8_lossy(name).to_ascii_uppercase())
            .unwrap_or_default()
    }

    /// Returns the first key this command operates on, if any.
    pub fn first_key(&self) -> Option<&[u8]> {
        let name = self.name();
        if name.is_empty()
            || KEYLESS_COMMANDS.contains(&name.as_str())
            || ADMIN_COMMANDS.contains(&name.as_str())
        {
            return None;
        }
        self.arg_idx(1)
    }

    /// Returns true if the command manages the server rather than operating on data.
    pub fn is_admin(&self) -> bool {
        ADMIN_COMMANDS.contains(&self.name().as_str())
    }
}

impl fmt::Debug for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for arg in &self.args {
            list.entry(&String::from_utf8_lossy(arg));
        }
        list.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_commands_are_detected_case_insensitively() {
        assert!(cmd("config").arg("GET").arg("maxmemory").is_admin());
        assert!(cmd("FLUSHALL").is_admin());
        assert!(!cmd("GET").arg("foo").is_admin());
    }

    #[test]
    fn first_key_skips_keyless_commands() {
        assert_eq!(cmd("GET").arg("foo").first_key(), Some(&b"foo"[..]));
        assert_eq!(cmd("PING").first_key(), None);
        assert_eq!(cmd("PUBLISH").arg("chan").arg("msg").first_key(), None);
        assert_eq!(cmd("DEL").first_key(), None);
    }

    #[test]
    fn integer_args_are_written_as_decimal() {
        let mut cmd = cmd("EXPIRE");
        cmd.arg("key").arg(-15i64);
        assert_eq!(cmd.arg_idx(2), Some(&b"-15"[..]));
        assert_eq!(format!("{cmd:?}"), r#"["EXPIRE", "key", "-15"]"#);
    }
}

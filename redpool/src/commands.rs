//! # Command Table
//!
//! Purpose: Keep the list of dispatchable commands in one place. The table
//! drives the per-command methods on `Client` and `Transaction`. Dispatch
//! itself is open: `check` lets any name through except session-state
//! commands that would corrupt a pooled connection.
//!
//! Each entry reads `method / method_with => "WIRE NAME"`.

use crate::error::CommandError;

/// Invokes `$target!` with the full command table.
macro_rules! for_each_command {
    ($target:ident) => {
        $target! {
            // strings
            append / append_with => "APPEND",
            decr / decr_with => "DECR",
            decrby / decrby_with => "DECRBY",
            get / get_with => "GET",
            getrange / getrange_with => "GETRANGE",
            getset / getset_with => "GETSET",
            incr / incr_with => "INCR",
            incrby / incrby_with => "INCRBY",
            incrbyfloat / incrbyfloat_with => "INCRBYFLOAT",
            mget / mget_with => "MGET",
            mset / mset_with => "MSET",
            msetnx / msetnx_with => "MSETNX",
            psetex / psetex_with => "PSETEX",
            set / set_with => "SET",
            setex / setex_with => "SETEX",
            setnx / setnx_with => "SETNX",
            setrange / setrange_with => "SETRANGE",
            strlen / strlen_with => "STRLEN",
            // keys
            del / del_with => "DEL",
            exists / exists_with => "EXISTS",
            expire / expire_with => "EXPIRE",
            expireat / expireat_with => "EXPIREAT",
            keys / keys_with => "KEYS",
            persist / persist_with => "PERSIST",
            pexpire / pexpire_with => "PEXPIRE",
            pttl / pttl_with => "PTTL",
            randomkey / randomkey_with => "RANDOMKEY",
            rename / rename_with => "RENAME",
            renamenx / renamenx_with => "RENAMENX",
            scan / scan_with => "SCAN",
            ttl / ttl_with => "TTL",
            key_type / key_type_with => "TYPE",
            unlink / unlink_with => "UNLINK",
            // hashes
            hdel / hdel_with => "HDEL",
            hexists / hexists_with => "HEXISTS",
            hget / hget_with => "HGET",
            hgetall / hgetall_with => "HGETALL",
            hincrby / hincrby_with => "HINCRBY",
            hkeys / hkeys_with => "HKEYS",
            hlen / hlen_with => "HLEN",
            hmget / hmget_with => "HMGET",
            hmset / hmset_with => "HMSET",
            hscan / hscan_with => "HSCAN",
            hset / hset_with => "HSET",
            hsetnx / hsetnx_with => "HSETNX",
            hvals / hvals_with => "HVALS",
            // lists
            lindex / lindex_with => "LINDEX",
            llen / llen_with => "LLEN",
            lpop / lpop_with => "LPOP",
            lpush / lpush_with => "LPUSH",
            lrange / lrange_with => "LRANGE",
            lrem / lrem_with => "LREM",
            lset / lset_with => "LSET",
            ltrim / ltrim_with => "LTRIM",
            rpop / rpop_with => "RPOP",
            rpoplpush / rpoplpush_with => "RPOPLPUSH",
            rpush / rpush_with => "RPUSH",
            // sets
            sadd / sadd_with => "SADD",
            scard / scard_with => "SCARD",
            sdiff / sdiff_with => "SDIFF",
            sinter / sinter_with => "SINTER",
            sismember / sismember_with => "SISMEMBER",
            smembers / smembers_with => "SMEMBERS",
            spop / spop_with => "SPOP",
            srandmember / srandmember_with => "SRANDMEMBER",
            srem / srem_with => "SREM",
            sscan / sscan_with => "SSCAN",
            sunion / sunion_with => "SUNION",
            // sorted sets
            zadd / zadd_with => "ZADD",
            zcard / zcard_with => "ZCARD",
            zcount / zcount_with => "ZCOUNT",
            zincrby / zincrby_with => "ZINCRBY",
            zrange / zrange_with => "ZRANGE",
            zrangebyscore / zrangebyscore_with => "ZRANGEBYSCORE",
            zrank / zrank_with => "ZRANK",
            zrem / zrem_with => "ZREM",
            zrevrange / zrevrange_with => "ZREVRANGE",
            zrevrank / zrevrank_with => "ZREVRANK",
            zscan / zscan_with => "ZSCAN",
            zscore / zscore_with => "ZSCORE",
            // hyperloglog
            pfadd / pfadd_with => "PFADD",
            pfcount / pfcount_with => "PFCOUNT",
            // server and connection
            dbsize / dbsize_with => "DBSIZE",
            echo / echo_with => "ECHO",
            flushdb / flushdb_with => "FLUSHDB",
            info / info_with => "INFO",
            ping / ping_with => "PING",
            publish / publish_with => "PUBLISH",
            time / time_with => "TIME",
        }
    };
}

pub(crate) use for_each_command;

macro_rules! command_names {
    ($($method:ident / $with:ident => $wire:literal,)*) => {
        /// Wire names of every dispatchable command.
        pub const COMMANDS: &[&str] = &[$($wire),*];
    };
}

for_each_command!(command_names);

/// Commands that change or depend on per-session state. Running them on a
/// pooled connection would leak that state to whoever leases it next.
pub const SESSION_COMMANDS: &[&str] = &[
    "AUTH", "DISCARD", "EXEC", "MULTI", "QUIT", "SELECT", "UNWATCH", "WATCH",
];

/// Checks that `name` may run on a pooled connection.
///
/// Any well-formed name passes, listed in [`COMMANDS`] or not; the store is
/// the judge of what exists. Only session commands and blank or
/// whitespace-bearing names are refused.
pub fn check(name: &str) -> Result<(), CommandError> {
    if name.is_empty() || name.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
        return Err(CommandError::Unknown {
            name: name.to_string(),
        });
    }
    match SESSION_COMMANDS
        .iter()
        .find(|wire| wire.eq_ignore_ascii_case(name))
    {
        Some(wire) => Err(CommandError::Unsupported {
            name: wire.to_ascii_lowercase(),
        }),
        None => Ok(()),
    }
}

/// Resolves a name in either case to its entry in [`COMMANDS`].
pub fn lookup(name: &str) -> Option<&'static str> {
    COMMANDS
        .iter()
        .copied()
        .find(|wire| wire.eq_ignore_ascii_case(name))
}

//! Server-side scripts backing the three atomic lock operations.
//!
//! Each script reads the current holder and mutates only when the holder
//! is absent or equal to `ARGV[1]`, so the check and the write cannot be
//! interleaved with another client's command.

/// `KEYS[1]` lock key, `ARGV[1]` token, `ARGV[2]` expiry in milliseconds.
/// Replies `OK` when the record was written, `-CONFLICT` otherwise.
pub const ACQUIRE: &str = r#"
local holder = redis.call('GET', KEYS[1])
if not holder or holder == ARGV[1] then
    return redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
end
return redis.error_reply('CONFLICT')
"#;

/// Replies `0` when the key is already gone, `1` when it was deleted.
pub const RELEASE: &str = r#"
local holder = redis.call('GET', KEYS[1])
if not holder then
    return 0
elseif holder == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return redis.error_reply('CONFLICT')
"#;

/// Replies the remaining lifetime in whole seconds, rounded down.
pub const INSPECT_TTL: &str = r#"
local holder = redis.call('GET', KEYS[1])
if not holder then
    return redis.error_reply('NOTFOUND')
elseif holder == ARGV[1] then
    return math.floor(redis.call('PTTL', KEYS[1]) / 1000)
end
return redis.error_reply('CONFLICT')
"#;

/// Status reply the acquire script returns on a successful write.
pub const SET_OK: &str = "OK";

use bytes::{Bytes, BytesMut};
use kvloop::*;

fn exec(d: &mut Dispatcher, cmd: Cmd) -> Result<String, DispatchError> {
    let mut out = BytesMut::new();
    d.execute(cmd, &mut out)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

fn set(k: &'static [u8], v: &'static [u8]) -> Cmd {
    Cmd::Set {
        key: Bytes::from_static(k),
        value: Bytes::from_static(v),
    }
}

fn get(k: &'static [u8]) -> Cmd {
    Cmd::Get {
        key: Bytes::from_static(k),
    }
}

#[test]
fn set_get_cycle() {
    let mut d = Dispatcher::default();
    assert_eq!(exec(&mut d, set(b"foo", b"bar")).unwrap(), "+OK\r\n");
    assert_eq!(exec(&mut d, get(b"foo")).unwrap(), "+bar\r\n");
    assert!(matches!(exec(&mut d, get(b"baz")), Err(DispatchError::KeyNotFound)));
    assert_eq!(d.store().len(), 1);
}

#[test]
fn overwrite_and_repeat() {
    let mut d = Dispatcher::default();
    exec(&mut d, set(b"k", b"v1")).unwrap();
    exec(&mut d, set(b"k", b"v2")).unwrap();
    assert_eq!(exec(&mut d, get(b"k")).unwrap(), "+v2\r\n");

    exec(&mut d, set(b"k", b"v2")).unwrap();
    assert_eq!(exec(&mut d, get(b"k")).unwrap(), "+v2\r\n");
    assert_eq!(d.store().len(), 1);
}

#[test]
fn handshake_commands() {
    let mut d = Dispatcher::default();
    assert_eq!(exec(&mut d, Cmd::Hello).unwrap(), "%1\r\n+server\r\n+redis\r\n");
    assert_eq!(
        exec(
            &mut d,
            Cmd::Client {
                subcommand: "setinfo".into()
            }
        )
        .unwrap(),
        "+OK\r\n"
    );

    // Store contents do not change the HELLO reply
    exec(&mut d, set(b"server", b"other")).unwrap();
    assert_eq!(exec(&mut d, Cmd::Hello).unwrap(), "%1\r\n+server\r\n+redis\r\n");
}

#[test]
fn decoded_request_executes() {
    let mut buf = BytesMut::new();
    write_command(&[b"set", b"a", b"1"], &mut buf);
    let (_, frame) = parse_frame(&buf).unwrap().unwrap();

    let mut d = Dispatcher::default();
    assert_eq!(exec(&mut d, Cmd::from_frame(frame).unwrap()).unwrap(), "+OK\r\n");
    assert_eq!(exec(&mut d, get(b"a")).unwrap(), "+1\r\n");
}

use bytes::{Buf, Bytes, BytesMut};
use kvloop::*;

#[test]
fn parse_pipelined_requests() {
    let mut buf = BytesMut::new();
    buf.extend_from_slice(b"*1\r\n$5\r\nhello\r\n");
    buf.extend_from_slice(b"*3\r\n$3\r\nset\r\n$1\r\na\r\n$1\r\n1\r\n");
    buf.extend_from_slice(b"*2\r\n$3\r\nget\r\n$1\r\na\r\n");

    let mut cmds = Vec::new();
    while let Some((n, frame)) = parse_frame(&buf).unwrap() {
        buf.advance(n);
        cmds.push(Cmd::from_frame(frame).unwrap());
    }
    assert!(buf.is_empty());
    assert!(matches!(cmds[0], Cmd::Hello));
    assert!(matches!(cmds[1], Cmd::Set { .. }));
    assert!(matches!(cmds[2], Cmd::Get { .. }));
}

#[test]
fn reader_over_byte_slice() {
    let data: &[u8] = b"*2\r\n$3\r\nget\r\n$3\r\nfoo\r\n+OK\r\n%1\r\n+server\r\n+redis\r\n";
    let mut reader = FrameReader::new(data);

    assert_eq!(
        reader.read_frame().unwrap(),
        Some(Frame::Array(vec![
            Frame::Bulk(Bytes::from_static(b"get")),
            Frame::Bulk(Bytes::from_static(b"foo")),
        ]))
    );
    assert_eq!(reader.read_frame().unwrap(), Some(Frame::Simple("OK".into())));
    assert_eq!(
        reader.read_frame().unwrap(),
        Some(Frame::Map(vec![(
            Frame::Simple("server".into()),
            Frame::Simple("redis".into())
        )]))
    );
    assert_eq!(reader.read_frame().unwrap(), None);
}

#[test]
fn unknown_and_non_array_requests_decode_to_errors() {
    let (_, frame) = parse_frame(b"*1\r\n$4\r\nping\r\n").unwrap().unwrap();
    assert_eq!(
        Cmd::from_frame(frame),
        Err(CommandError::UnknownCommand("ping".into()))
    );

    let (_, frame) = parse_frame(b":5\r\n").unwrap().unwrap();
    assert_eq!(Cmd::from_frame(frame), Err(CommandError::NotAnArray));
}

#[test]
fn encoders() {
    let mut out = BytesMut::new();
    write_simple("OK", &mut out);
    write_error("ERR key not found", &mut out);
    write_integer(-3, &mut out);
    write_bulk(b"bin\0ary", &mut out);
    write_null(&mut out);
    assert_eq!(
        &out[..],
        &b"+OK\r\n-ERR key not found\r\n:-3\r\n$7\r\nbin\0ary\r\n$-1\r\n"[..]
    );
}

use super::*;

#[test]
fn test_stream_layout() {
    let serializer = ChannelStateSerializer;
    let mut stream = Vec::new();
    serializer.write_header(&mut stream);
    assert_eq!(serializer.write_data(&mut stream, b"hi"), 6);
    assert_eq!(stream, vec![0, 0, 0, 1, 0, 0, 0, 2, b'h', b'i']);
    assert_eq!(serializer.read_data(&stream, 4).unwrap(), b"hi");
}

#[test]
fn test_rejects_unknown_version() {
    let serializer = ChannelStateSerializer;
    let error = serializer.read_header(&[0, 0, 0, 9]).unwrap_err();
    assert!(error.to_string().contains("version 9"));
    assert!(serializer.read_header(&[0, 1]).is_err());
}

#[test]
fn test_truncated_chunk_is_an_error() {
    let serializer = ChannelStateSerializer;
    let mut stream = Vec::new();
    serializer.write_header(&mut stream);
    serializer.write_data(&mut stream, b"abcdef");
    stream.truncate(stream.len() - 1);

    assert!(serializer.read_channel(&stream, &[4]).is_err());
    assert!(serializer.read_data(&stream, 100).is_err());
}

use nom::{
    branch::alt,
    bytes::complete::{tag, take_until, take_while_m_n},
    character::{complete::char, is_hex_digit},
    combinator::{map_res, opt, peek, value},
    map,
    multi::{many1, separated_nonempty_list},
    named,
    number::complete::hex_u32,
    recognize,
    sequence::preceded,
    IResult,
};

#[derive(Debug, PartialEq, Clone)]
pub enum QueryPacket {
    ThreadId,
    Attached(Option<Pid>),
    Command(Vec<u8>),
    Supported(Vec<Vec<u8>>),
    /// qXfer command
    Transfer {
        object: Vec<u8>,
        operation: TransferOperation,
    },
    /// `qHostInfo` — answered empty; reserved for LLDB clients that probe
    /// for it before falling back to the standard GDB queries.
    HostInfo,
    /// `qCRC:addr,length` — checksum query over a memory range.
    Crc { address: u32, length: u32 },
}

#[derive(Debug, PartialEq, Clone)]
pub enum TransferOperation {
    Read {
        annex: Vec<u8>,
        offset: u32,
        length: u32,
    },
    Write {
        annex: Vec<u8>,
        offset: u32,
        data: Vec<u8>,
    },
}

pub type Pid = u32;

/// Parse PID
fn pid(input: &[u8]) -> IResult<&[u8], Pid> {
    hex_u32(input)
}

pub fn query_packet(input: &[u8]) -> IResult<&[u8], QueryPacket> {
    let (input, query_packet) = alt((
        query_thread_id,
        query_attached,
        query_command,
        query_supported,
        query_transfer,
        query_host_info,
        query_crc,
    ))(input)?;

    Ok((input, query_packet))
}

fn query_thread_id(input: &[u8]) -> IResult<&[u8], QueryPacket> {
    let (input, _) = char('C')(input)?;
    Ok((input, QueryPacket::ThreadId))
}

fn query_command(input: &[u8]) -> IResult<&[u8], QueryPacket> {
    let (input, _) = tag("Rcmd,")(input)?;

    let (input, command) = hex_bytes(input)?;
    Ok((input, QueryPacket::Command(command)))
}

fn query_attached(input: &[u8]) -> IResult<&[u8], QueryPacket> {
    let (input, _) = tag("Attached")(input)?;

    let (input, pid) = opt(preceded(char(':'), pid))(input)?;
    Ok((input, QueryPacket::Attached(pid)))
}

fn query_supported(input: &[u8]) -> IResult<&[u8], QueryPacket> {
    let (input, _) = tag("Supported")(input)?;

    let (input, next_char) = peek(char(':'))(input)?;

    // Could also be an empty list
    let (input, features) = if next_char == ':' {
        let (input, _) = char(':')(input)?;

        separated_nonempty_list(tag(";"), gdb_feature)(input)?
    } else {
        (input, vec![])
    };

    Ok((input, QueryPacket::Supported(features)))
}

fn gdb_feature(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    let (input, data) = take_until(";")(input)?;

    Ok((input, data.to_owned()))
}

fn query_transfer(input: &[u8]) -> IResult<&[u8], QueryPacket> {
    let (input, _) = tag("Xfer")(input)?;

    let (input, _) = char(':')(input)?;

    let (input, object) = take_until(":")(input)?;

    let (input, _) = char(':')(input)?;

    let (input, operation) = alt((transfer_operation_read, transfer_operation_write))(input)?;

    Ok((
        input,
        QueryPacket::Transfer {
            object: object.to_owned(),
            operation,
        },
    ))
}

fn transfer_operation_read(input: &[u8]) -> IResult<&[u8], TransferOperation> {
    let (input, _) = tag("read")(input)?;
    let (input, _) = char(':')(input)?;

    let (input, annex) = take_until(":")(input)?;

    let (input, _) = char(':')(input)?;

    let (input, offset) = hex_u32(input)?;

    let (input, _) = char(':')(input)?;

    let (input, length) = hex_u32(input)?;

    Ok((
        input,
        TransferOperation::Read {
            annex: annex.to_owned(),
            offset,
            length,
        },
    ))
}

fn transfer_operation_write(input: &[u8]) -> IResult<&[u8], TransferOperation> {
    let (input, _) = tag("write")(input)?;
    let (input, annex) = take_until(":")(input)?;

    let (input, _) = char(':')(input)?;

    let (input, offset) = hex_u32(input)?;

    let (input, _) = char(':')(input)?;

    Ok((
        &[],
        TransferOperation::Write {
            annex: annex.to_owned(),
            offset,
            data: input.to_owned(),
        },
    ))
}

fn query_host_info(input: &[u8]) -> IResult<&[u8], QueryPacket> {
    value(QueryPacket::HostInfo, tag("HostInfo"))(input)
}

fn query_crc(input: &[u8]) -> IResult<&[u8], QueryPacket> {
    let (input, _) = tag("CRC:")(input)?;
    let (input, address) = hex_u32(input)?;
    let (input, _) = char(',')(input)?;
    let (input, length) = hex_u32(input)?;

    Ok((input, QueryPacket::Crc { address, length }))
}

fn hex_bytes(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    let (input, bytes) = many1(hex_byte)(input)?;

    Ok((input, bytes))
}

fn hex_byte(input: &[u8]) -> IResult<&[u8], u8> {
    let (input, digits) = take_while_m_n(2, 2, is_hex_digit)(input)?;

    let result = (digits[0] as char).to_digit(16).unwrap_or(0) << 4
        | (digits[1] as char).to_digit(16).unwrap_or(0);

    Ok((input, result as u8))
}

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::char,
    combinator::{map, value},
    number::complete::hex_u32,
    IResult,
};

#[derive(Debug, PartialEq, Clone)]
pub enum VPacket {
    Attach,
    Continue(Action),
    Unknown(Vec<u8>),
    QueryContSupport,
    /// `vFlashErase:addr,length`
    FlashErase { addr: u32, length: u32 },
    /// `vFlashWrite:addr:XX..` (binary-escaped data, already un-escaped by
    /// the packet codec by the time it reaches this parser)
    FlashWrite { addr: u32, data: Vec<u8> },
    /// `vFlashDone`
    FlashDone,
    /// `vKill` — per spec, sets `attached = false`
    Kill,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Action {
    Continue,
    ContinueSignal(u8),
    Step,
    StepSignal,
    Stop,
    RangeStep { start: u32, end: u32 },
}

pub fn v_packet(input: &[u8]) -> IResult<&[u8], VPacket> {
    let parse_result = alt((
        v_flash_erase,
        v_flash_write,
        v_flash_done,
        v_kill,
        v_cont_support,
        v_cont,
    ))(input);

    match parse_result {
        Ok((input, packet)) => Ok((input, packet)),
        Err(nom::Err::Error((input, _kind))) => {
            // For unknown packets, we have to return a valid packet here.
            // This is requird by the GDB spec.
            Ok(("".as_bytes(), VPacket::Unknown(input.to_owned())))
        }
        Err(other) => Err(other),
    }
}

fn v_cont_support(input: &[u8]) -> IResult<&[u8], VPacket> {
    let (input, _) = tag("Cont?")(input)?;

    Ok((input, VPacket::QueryContSupport))
}

fn v_cont(input: &[u8]) -> IResult<&[u8], VPacket> {
    let (input, _) = tag("Cont;")(input)?;

    let (input, action) = v_cont_action(input)?;

    Ok((input, VPacket::Continue(action)))
}

fn v_flash_erase(input: &[u8]) -> IResult<&[u8], VPacket> {
    let (input, _) = tag("FlashErase:")(input)?;
    let (input, addr) = hex_u32(input)?;
    let (input, _) = char(',')(input)?;
    let (input, length) = hex_u32(input)?;

    Ok((input, VPacket::FlashErase { addr, length }))
}

fn v_flash_write(input: &[u8]) -> IResult<&[u8], VPacket> {
    let (input, _) = tag("FlashWrite:")(input)?;
    let (input, addr) = hex_u32(input)?;
    let (input, _) = char(':')(input)?;

    // Whatever remains is the (already un-escaped) binary payload.
    Ok((
        &[],
        VPacket::FlashWrite {
            addr,
            data: input.to_owned(),
        },
    ))
}

fn v_flash_done(input: &[u8]) -> IResult<&[u8], VPacket> {
    value(VPacket::FlashDone, tag("FlashDone"))(input)
}

fn v_kill(input: &[u8]) -> IResult<&[u8], VPacket> {
    value(VPacket::Kill, tag("Kill"))(input)
}

fn v_cont_action(input: &[u8]) -> IResult<&[u8], Action> {
    alt((
        value(Action::Continue, char('c')),
        value(Action::Step, char('s')),
        value(Action::Stop, char('t')),
    ))(input)
}

#[cfg(test)]
mod test {
    use super::*;

    const EMPTY: &[u8] = &[];

    #[test]
    fn parse_v_cont_support() {
        assert_eq!(
            v_packet(b"Cont?").unwrap(),
            (EMPTY, VPacket::QueryContSupport)
        );
    }

    #[test]
    fn parse_v_cont_cont() {
        assert_eq!(
            v_packet(b"Cont;c").unwrap(),
            (EMPTY, VPacket::Continue(Action::Continue))
        );
    }

    #[test]
    fn parse_v_cont_step() {
        assert_eq!(
            v_packet(b"Cont;s").unwrap(),
            (EMPTY, VPacket::Continue(Action::Step))
        );
    }

    #[test]
    fn parse_v_cont_stop() {
        assert_eq!(
            v_packet(b"Cont;t").unwrap(),
            (EMPTY, VPacket::Continue(Action::Stop))
        );
    }

    #[test]
    fn parse_v_flash_erase() {
        assert_eq!(
            v_packet(b"FlashErase:08000000,800").unwrap(),
            (
                EMPTY,
                VPacket::FlashErase {
                    addr: 0x0800_0000,
                    length: 0x800
                }
            )
        );
    }

    #[test]
    fn parse_v_flash_write() {
        assert_eq!(
            v_packet(b"FlashWrite:08000000:\xaa\xaa\xaa").unwrap(),
            (
                EMPTY,
                VPacket::FlashWrite {
                    addr: 0x0800_0000,
                    data: vec![0xaa, 0xaa, 0xaa]
                }
            )
        );
    }

    #[test]
    fn parse_v_flash_done() {
        assert_eq!(v_packet(b"FlashDone").unwrap(), (EMPTY, VPacket::FlashDone));
    }

    #[test]
    fn parse_v_kill() {
        assert_eq!(v_packet(b"Kill").unwrap(), (EMPTY, VPacket::Kill));
    }
}

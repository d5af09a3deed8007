mod test_channel;
